mod actions;
mod cli;
mod config;
mod dispatch;
mod filter;
mod gestures;
mod input;
mod ipc;
mod logging;
mod motion;
mod session;
mod tracker;
mod voice;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
