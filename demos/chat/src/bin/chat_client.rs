use clap::{Arg, Command};
use positron::logging;
use positron::{ClientDirector, Value};
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn main() {
    let matches = Command::new("Chat Client")
        .version("1.0")
        .about("Connects to the chat demo server.")
        .arg(Arg::new("LOGIN").help("Account login").default_value("login"))
        .arg(Arg::new("TOKEN").help("Account token").default_value("password"))
        .arg(
            Arg::new("address")
                .long("address")
                .help("Server address")
                .default_value("127.0.0.1:7200"),
        )
        .get_matches();

    let log = logging::init();

    let address: SocketAddr = matches
        .get_one::<String>("address")
        .unwrap()
        .parse()
        .expect("Invalid server address");
    let login = matches.get_one::<String>("LOGIN").unwrap();
    let token = matches.get_one::<String>("TOKEN").unwrap();

    let mut client = ClientDirector::new(
        chatdemo::build_registry(),
        chatdemo::TALKER,
        Box::new(|oid| {
            println!("Connected to the server as {}", oid);
            println!("Type /name <username> to rename yourself, anything else to chat.");
        }),
        &log,
    )
    .expect("Error initializing the chat client");

    client
        .connect(address, login, token)
        .expect("Could not connect to server");

    // Terminal input arrives on its own thread; the director stays on the
    // reactor thread and drains the queue between ticks.
    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    while client.is_connected() {
        client.poll(Some(Duration::from_millis(15)));

        while let Ok(line) = line_rx.try_recv() {
            let avatar = match client.avatar() {
                Some(avatar) => avatar,
                None => {
                    println!("You are not connected to the server!");
                    continue;
                }
            };

            let result = if let Some(name) = line.strip_prefix("/name ") {
                client.send_update(avatar, "request_username", &[Value::from(name)])
            } else if line.is_empty() {
                Ok(())
            } else {
                client.send_update(avatar, "request_message", &[Value::from(line.as_str())])
            };

            if let Err(err) = result {
                logging::warn!(log, "failed to send"; "error" => ?err);
            }
        }
    }

    match client.kick_reason() {
        Some(reason) => println!("Disconnected: {}", reason.describe()),
        None => println!("Connection closed."),
    }
}
