use clap::Parser;
use log::error;

use scatterweb::{Config, Reactor};

fn main() {
    let config = Config::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let mut reactor = match Reactor::new(&config) {
        Ok(reactor) => reactor,
        Err(e) => {
            error!("failed to start: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = reactor.run() {
        error!("reactor exited: {e}");
        std::process::exit(1);
    }
}
