use meter_ingest::app;

#[tokio::main]
async fn main() {
    let code = match app::main().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("meter-forwarder: {e:#}");
            1
        }
    };
    // Exit directly so a pending stdin read cannot hold the runtime open.
    std::process::exit(code);
}
