pub mod ai;
pub mod app;
pub mod camera;
pub mod console;
pub mod images;
pub mod settings;
pub mod store;

use app::{App, Collaborators};
use console::{ConsoleDisplay, ConsoleState, ConsoleStatus};
use settings::Settings;

/// Load settings, wire the camera and provider backends to the console
/// front end, and run the event loop until the user quits.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Using default settings: {}", e);
            Settings::default()
        }
    }
    .with_env_overrides();

    let collaborators = Collaborators::from_settings(&settings);
    let console_state = ConsoleState::from_settings(&settings);
    let app = App::new(
        settings,
        collaborators,
        Box::new(ConsoleDisplay::default()),
        Box::new(ConsoleStatus),
    )?;

    let console = console::spawn_console(app.handle(), console_state)?;
    app.run();
    // The reader thread stays blocked on stdin after a shutdown from elsewhere.
    drop(console);
    log::info!("Bye");
    Ok(())
}
