use console_web::println;
use idb_admin::{web::WebBackend, FormController};
use log::{Level, LevelFilter, Metadata, Record};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

/// Forwards `log` records to the browser console.
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

fn level() -> LevelFilter {
    if cfg!(any(debug_assertions, feature = "console_logging")) {
        LevelFilter::Debug
    } else {
        Level::Info.to_level_filter()
    }
}

async fn main() {
    let backend = match WebBackend::new() {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };

    let mut form = FormController::new(backend);
    form.init().await;

    match &form.last_error {
        Some(e) => log::error!("couldn't list databases: {e}"),
        None => {
            log::info!("{} database(s)", form.database_list.len());
            for db in &form.database_list {
                log::info!("{} (version {})", db.name, db.version);
            }
        }
    }
}

#[wasm_bindgen(start)]
pub fn run() {
    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level());
    }

    spawn_local(main());
}
