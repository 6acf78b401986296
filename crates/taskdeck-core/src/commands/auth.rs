use tracing::{info, instrument};

use super::Context;
use crate::api::{AuthBackend, Credentials, Signup};
use crate::cli::{LoginArgs, SignupArgs};

#[instrument(skip_all, fields(username = %args.username))]
pub(super) async fn cmd_signup(ctx: &Context, args: SignupArgs) -> anyhow::Result<()> {
    info!("command signup");
    let signup = Signup {
        username: args.username,
        email: args.email,
        password: args.password,
    };
    ctx.backend.signup(&signup).await?;
    println!("Signup successful! Please log in.");
    Ok(())
}

#[instrument(skip_all, fields(username = %args.username))]
pub(super) async fn cmd_login(ctx: &Context, args: LoginArgs) -> anyhow::Result<()> {
    info!("command login");
    let credentials = Credentials {
        username: args.username,
        password: args.password,
    };
    let token = ctx.backend.signin(&credentials).await?;
    let owner_id = ctx.session.store_login(&token)?;
    println!("Logged in as {owner_id}.");
    Ok(())
}

#[instrument(skip_all)]
pub(super) fn cmd_logout(ctx: &Context) -> anyhow::Result<()> {
    info!("command logout");
    ctx.session.logout()?;
    println!("Logged out successfully!");
    Ok(())
}

#[instrument(skip_all)]
pub(super) fn cmd_whoami(ctx: &Context) -> anyhow::Result<()> {
    let owner_id = ctx.session.resolve_owner_id()?;
    println!("{owner_id}");
    Ok(())
}
