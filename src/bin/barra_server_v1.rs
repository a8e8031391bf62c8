use std::env;
use std::sync::Mutex;

use actix_web::{web, App, HttpServer};
use ludwigia::http::barra_v1::server::*;
use ludwigia::http::barra_v1::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    let address: String = args[1].clone();
    let port: u16 = args[2].parse().unwrap();

    let app_state = web::Data::new(Mutex::new(AppState::new()));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .service(create)
            .service(destroy)
            .service(tick)
            .service(step_batch)
            .service(place_order)
            .service(cancel_order)
            .service(snapshot)
            .service(history)
            .service(fills)
    })
    .bind((address, port))?
    .run()
    .await
}
