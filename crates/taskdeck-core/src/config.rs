use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::api::{
  ApiSettings,
  DEFAULT_API_URL,
  DEFAULT_SHEETS_URL
};
use crate::import::FieldSplitting;

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Built-in defaults only, no rc file.
  pub fn defaults() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("api.url", DEFAULT_API_URL),
      ("sheets.url", DEFAULT_SHEETS_URL),
      ("data.location", "~/.taskdeck"),
      ("color", "on"),
      ("import.quoted", "off"),
      ("confirmation", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    Config {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    rcfile_override
  ))]
  pub fn load(
    rcfile_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::defaults();

    let rcfile = resolve_rcfile_path(
      rcfile_override
    )?;
    if let Some(path) = rcfile {
      info!(rcfile = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn api_settings(
    &self
  ) -> anyhow::Result<ApiSettings> {
    let timeout = match self
      .get("api.timeout")
      .filter(|v| !v.trim().is_empty())
    {
      | Some(raw) => {
        let secs = raw
          .trim()
          .parse::<u64>()
          .with_context(|| {
            format!(
              "invalid api.timeout \
               {raw:?}; expected \
               seconds"
            )
          })?;
        Some(Duration::from_secs(secs))
      }
      | None => None
    };

    Ok(ApiSettings {
      base_url: self
        .get("api.url")
        .unwrap_or_else(|| {
          DEFAULT_API_URL.to_string()
        }),
      sheets_url: self
        .get("sheets.url")
        .unwrap_or_else(|| {
          DEFAULT_SHEETS_URL
            .to_string()
        }),
      timeout
    })
  }

  pub fn field_splitting(
    &self
  ) -> FieldSplitting {
    if self
      .get_bool("import.quoted")
      .unwrap_or(false)
    {
      FieldSplitting::Quoted
    } else {
      FieldSplitting::Plain
    }
  }

  pub fn confirmation(&self) -> bool {
    self
      .get_bool("confirmation")
      .unwrap_or(true)
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rcfile_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("TASKDECKRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  let candidate =
    home.join(".taskdeckrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".taskdeck"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::Duration;

  use tempfile::tempdir;

  use super::Config;
  use crate::import::FieldSplitting;

  #[test]
  fn rc_file_with_include_and_overrides()
  {
    let temp = tempdir().unwrap();
    let extra = temp.path().join("extra.rc");
    fs::write(
      &extra,
      "import.quoted = yes\n"
    )
    .unwrap();
    let main = temp.path().join("main.rc");
    fs::write(
      &main,
      "# local backend\napi.url = http://localhost:5000 # dev\ninclude extra.rc\napi.timeout=30\n"
    )
    .unwrap();

    let mut cfg =
      Config::load(Some(&main)).unwrap();
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.field_splitting(),
      FieldSplitting::Quoted
    );

    let api = cfg.api_settings().unwrap();
    assert_eq!(
      api.base_url,
      "http://localhost:5000"
    );
    assert_eq!(
      api.timeout,
      Some(Duration::from_secs(30))
    );

    cfg.apply_overrides(vec![(
      "rc.confirmation".to_string(),
      "off".to_string()
    )]);
    assert!(!cfg.confirmation());
  }

  #[test]
  fn defaults_have_no_timeout() {
    let cfg = Config::defaults();
    let api = cfg.api_settings().unwrap();
    assert_eq!(api.timeout, None);
    assert!(cfg.confirmation());
    assert_eq!(
      cfg.field_splitting(),
      FieldSplitting::Plain
    );
  }

  #[test]
  fn bad_lines_and_timeouts_are_errors()
  {
    let temp = tempdir().unwrap();
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "just words\n").unwrap();
    assert!(Config::load(Some(&rc)).is_err());

    let mut cfg = Config::defaults();
    cfg.apply_overrides(vec![(
      "api.timeout".to_string(),
      "soon".to_string()
    )]);
    assert!(cfg.api_settings().is_err());
  }
}
