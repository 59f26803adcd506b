use std::env;
use std::sync::Mutex;

use actix_web::{web, App, HttpServer};
use lanes::devnet::server::rpc;
use lanes::devnet::DevnetState;
use lanes::lane::DEFAULT_LANES;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: lanes_devnet <address> <port> [api_key]");
        std::process::exit(2);
    }

    let address: String = args[1].clone();
    let port: u16 = match args[2].parse() {
        Ok(port) => port,
        Err(e) => {
            eprintln!("invalid port {}: {}", args[2], e);
            std::process::exit(2);
        }
    };

    let mut devnet = DevnetState::seeded(DEFAULT_LANES);
    if let Some(key) = args.get(3) {
        devnet = devnet.with_api_key(key.clone());
    }
    let devnet_state = web::Data::new(Mutex::new(devnet));

    log::info!("DEVNET: Listening on {}:{}", address, port);
    HttpServer::new(move || App::new().app_data(devnet_state.clone()).service(rpc))
        .bind((address, port))?
        .run()
        .await
}
