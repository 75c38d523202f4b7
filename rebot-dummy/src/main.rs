use rebot_dummy::RebotDummyServer;
use std::time::Duration;

fn usage() -> ! {
    eprintln!("usage: rebot-dummy [n_words] [protocol_version]");
    std::process::exit(2);
}

fn main() {
    let mut args = std::env::args().skip(1);
    let n_words: usize = match args.next() {
        Some(value) => value.parse().unwrap_or_else(|_| usage()),
        None => 1024,
    };
    let protocol_version: u32 = match args.next() {
        Some(value) => value.parse().unwrap_or_else(|_| usage()),
        None => 1,
    };

    let server =
        RebotDummyServer::start(n_words, protocol_version).expect("cannot start the dummy server");
    println!(
        "rebot dummy server: port {}, {} words, protocol {}",
        server.port(),
        n_words,
        protocol_version
    );

    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}
