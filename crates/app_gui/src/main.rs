mod app;

use app::UiApp;
use eframe::NativeOptions;

fn main() {
    tracing_subscriber::fmt::init();
    let options = NativeOptions::default();
    if let Err(e) = eframe::run_native(
        "CardCheck",
        options,
        Box::new(|cc| Ok(Box::new(UiApp::new(cc)))),
    ) {
        eprintln!("Application stopped with error: {e}");
    }
}
