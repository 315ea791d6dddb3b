use chatdemo::ChatConfig;
use clap::{Arg, Command};
use positron::config::DEFAULT_PORT;
use positron::logging;
use positron::{ServerDirector, StaticDatabase};

fn main() {
    let matches = Command::new("Chat Server")
        .version("1.0")
        .about("Runs the chat demo server.")
        .arg(Arg::new("CONFIG_FILE").help("Path to the config file"))
        .get_matches();

    let log = logging::init();

    let config = match matches.get_one::<String>("CONFIG_FILE") {
        Some(path) => ChatConfig::load(path),
        None => ChatConfig::default(),
    };

    let address = config
        .server
        .address
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT))
        .parse()
        .expect("Invalid listen address");

    let db = StaticDatabase::from_entries(&config.users, &log);
    let mut director = ServerDirector::new(
        chatdemo::build_registry(),
        Box::new(db),
        chatdemo::TALKER,
        address,
        config.server.max_clients as usize,
        &log,
    )
    .expect("Error launching the chat server");

    director.run();
}
