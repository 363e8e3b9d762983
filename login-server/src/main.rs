use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::{App, Arg};
use slog::{error, info};

use login_server::account::InMemoryAccountStore;
use login_server::bus::{BusPublisher, BusSubscriber};
use login_server::config::ServerConfig;
use login_server::crypto::RsaCipher;
use login_server::dispatch::Dispatcher;
use login_server::events::script::NullScriptEngine;
use login_server::events::ScriptHost;
use login_server::net::{Acceptor, ConnectionRegistry};
use login_server::services::Services;
use login_server::signals;

fn main() {
    let matches = App::new("Login Server")
        .version("1.0")
        .author("PWO Team")
        .about("Accepts client handshakes, authenticates accounts, and hands back session keys.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the server's TOML config file")
                .default_value("login.toml"),
        )
        .get_matches();

    let config_path = matches.value_of("CONFIG_FILE").unwrap();

    let config = match ServerConfig::load(Path::new(config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    let logger = flux::logging::init(&config.log_level);
    info!(logger, "starting login server"; "host" => &config.host, "port" => config.port);

    let rsa = match RsaCipher::load_pem(Path::new(&config.key_path)) {
        Ok(r) => r,
        Err(e) => {
            error!(logger, "failed to load RSA key"; "path" => &config.key_path, "error" => %e);
            std::process::exit(1);
        }
    };

    let dispatcher = Dispatcher::start(logger.clone());
    let script_host = Arc::new(Mutex::new(ScriptHost::new(Box::new(NullScriptEngine::new()))));
    if let Err(e) = script_host
        .lock()
        .unwrap()
        .load_modules_from_disk(Path::new(&config.modules_path), &logger)
    {
        error!(logger, "failed to load modules"; "path" => &config.modules_path, "error" => %e);
        std::process::exit(1);
    }
    let registry = ConnectionRegistry::new();

    let bus_publisher = match BusPublisher::connect(&config.redis_host, config.redis_port, logger.clone()) {
        Ok(p) => Some(Arc::new(p)),
        Err(e) => {
            error!(logger, "bus publisher unavailable, continuing without it"; "error" => %e);
            None
        }
    };

    let bus_subscriber = match BusSubscriber::start(
        &config.redis_host,
        config.redis_port,
        &config.redis_channel,
        dispatcher.clone(),
        script_host.clone(),
        logger.clone(),
    ) {
        Ok(s) => Some(Arc::new(s)),
        Err(e) => {
            error!(logger, "bus subscriber unavailable, continuing without it"; "error" => %e);
            None
        }
    };

    let services = Arc::new(Services {
        config: config.clone(),
        rsa,
        account_store: Box::new(InMemoryAccountStore::new()),
        script_host: script_host.clone(),
        dispatcher: dispatcher.clone(),
        bus_publisher,
        logger: logger.clone(),
    });

    let acceptor = match Acceptor::bind(&config.host, config.port, registry.clone(), services.clone()) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!(logger, "failed to bind listener"; "error" => %e);
            std::process::exit(1);
        }
    };

    if let Err(e) = signals::install_ctrlc_handler(
        acceptor.clone(),
        bus_subscriber.clone(),
        dispatcher.clone(),
        registry.clone(),
        logger.clone(),
    ) {
        error!(logger, "failed to install signal handler"; "error" => %e);
    }

    info!(logger, "accepting connections"; "addr" => acceptor.local_addr().map(|a| a.to_string()).unwrap_or_default());
    acceptor.run();
}
