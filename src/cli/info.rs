use anyhow::Result;

use crate::cli::context::CliContext;

pub fn cmd_info(ctx: &CliContext) -> Result<()> {
    println!("qapilot v{}", env!("CARGO_PKG_VERSION"));
    println!("  commit:     {}", env!("QAPILOT_GIT_HASH"));
    println!("  built:      {}", env!("QAPILOT_BUILD_DATE"));
    match ctx.loaded_from() {
        Some(path) => println!("  config:     {}", path.display()),
        None => println!("  config:     defaults"),
    }
    let agent = &ctx.config().agent;
    println!(
        "  budgets:    {} steps, {} consecutive failures, {} repetitions",
        agent.max_steps, agent.max_failures, agent.max_repetitions
    );
    println!("  oracle:     {}", ctx.config().oracle.endpoint);
    Ok(())
}
