use std::sync::Arc;

use http::StatusCode;
use http::header::CONTENT_TYPE;
use micro_httpd::config::{DaemonOptions, ThreadingMode};
use micro_httpd::daemon::Daemon;
use micro_httpd::handler::{Action, Upload, UploadAction, make_handler};
use micro_httpd::protocol::{Method, RequestView, Response};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let handler = make_handler(|request: &RequestView<'_>| {
        info!(method = request.method_str(), path = %request.path(), "request");
        match request.method() {
            // echo what was posted
            Method::Post => Action::Upload(Upload::full(64 * 1024, |_request: &RequestView<'_>, body: &[u8]| {
                info!(body = %String::from_utf8_lossy(body), "receiving request body");
                match Response::builder(StatusCode::OK).header(CONTENT_TYPE, "text/plain").buffer(body.to_vec()).build() {
                    Ok(response) => UploadAction::response(response),
                    Err(_) => UploadAction::Abort,
                }
            })),
            _ => Action::response(Response::from_buffer(StatusCode::OK, "Hello World!\r\n")),
        }
    });

    let options = DaemonOptions::builder()
        .threading_mode(ThreadingMode::ThreadPool)
        .connection_default_timeout(30)
        .build()
        .expect("valid options");

    let mut daemon = match Daemon::new(options, Arc::new(handler)) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(cause = %e, "failed to create daemon");
            return;
        }
    };
    match daemon.start("127.0.0.1:8080") {
        Ok(addr) => info!(%addr, "start listening"),
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    }
    std::thread::park();
}
