// console.rs - Line-oriented front end: stdin commands in, status text out.
// Commands are parsed on a reader thread and posted to the event loop.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crate::ai::ProviderKind;
use crate::app::{AnalyzeParams, AppEvent, AppHandle, DisplaySink, StatusSink};
use crate::images::DisplayFrame;
use crate::settings::Settings;

pub const HELP: &str = "\
Commands:
  camera                 start or stop the live preview
  device <id>            switch to local camera <id>
  network <url>          switch to a network camera
  capture                save a frame from the active camera
  subscribe [url]        poll a network camera for new images
  unsubscribe            stop polling
  open <path>...         load image files
  random                 load random images from the dataset
  select <n>             select image n (1-based)
  clear                  remove all images
  provider <name>        Gemini, OpenAI or Ollama
  model <name>           model for the current provider
  prompt <text>          classification prompt
  temperature <x>        sampling temperature (0.1 to 1.0)
  tokens <n>             max output tokens (1 to 500)
  analyze                classify the selected image
  save                   keep provider, model, prompt and sampling settings
  help                   show this text
  quit                   exit";

/// What a console line turns into.
pub enum ConsoleAction {
    Post(AppEvent),
    Say(String),
    Quit,
    Nothing,
}

/// Analysis parameters edited from the console, plus the remembered
/// network camera address.
#[derive(Debug, Clone)]
pub struct ConsoleState {
    pub params: AnalyzeParams,
    pub camera_url: Option<String>,
}

impl ConsoleState {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            params: AnalyzeParams::from_settings(settings),
            camera_url: settings.esp32_url.clone(),
        }
    }
}

pub fn parse_command(line: &str, state: &mut ConsoleState) -> Result<ConsoleAction, String> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let action = match command.to_ascii_lowercase().as_str() {
        "" => ConsoleAction::Nothing,
        "camera" | "toggle" => ConsoleAction::Post(AppEvent::ToggleCamera),
        "device" => {
            let id = rest
                .parse::<u32>()
                .map_err(|_| format!("Invalid device id: {:?}", rest))?;
            ConsoleAction::Post(AppEvent::SwitchDevice(id))
        }
        "network" => {
            let url = required(rest, "network <url>")?;
            state.camera_url = Some(url.to_string());
            ConsoleAction::Post(AppEvent::UseNetworkCamera(url.to_string()))
        }
        "capture" => ConsoleAction::Post(AppEvent::Capture),
        "subscribe" => {
            let url = if rest.is_empty() {
                state
                    .camera_url
                    .clone()
                    .ok_or_else(|| "Usage: subscribe <url>".to_string())?
            } else {
                state.camera_url = Some(rest.to_string());
                rest.to_string()
            };
            ConsoleAction::Post(AppEvent::Subscribe(url))
        }
        "unsubscribe" => ConsoleAction::Post(AppEvent::Unsubscribe),
        "open" => {
            required(rest, "open <path>...")?;
            let paths = rest.split_whitespace().map(PathBuf::from).collect();
            ConsoleAction::Post(AppEvent::OpenImages(paths))
        }
        "random" => ConsoleAction::Post(AppEvent::RandomImages),
        "select" => {
            let n = rest
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("Invalid image number: {:?}", rest))?;
            ConsoleAction::Post(AppEvent::Select(n - 1))
        }
        "clear" => ConsoleAction::Post(AppEvent::Clear),
        "provider" => {
            let kind: ProviderKind = required(rest, "provider <name>")?.parse()?;
            state.params.provider = kind.name().to_string();
            if !kind.models().contains(&state.params.model.as_str()) {
                state.params.model = kind.models()[0].to_string();
            }
            ConsoleAction::Say(format!(
                "Provider: {} (model {})",
                state.params.provider, state.params.model
            ))
        }
        "model" => {
            state.params.model = required(rest, "model <name>")?.to_string();
            ConsoleAction::Say(format!("Model: {}", state.params.model))
        }
        "prompt" => {
            state.params.prompt = required(rest, "prompt <text>")?.to_string();
            ConsoleAction::Say("Prompt updated".into())
        }
        "temperature" => {
            state.params.temperature = rest
                .parse::<f32>()
                .map_err(|_| format!("Invalid temperature: {:?}", rest))?;
            ConsoleAction::Say(format!("Temperature: {}", state.params.temperature))
        }
        "tokens" => {
            state.params.max_tokens = rest
                .parse::<u32>()
                .map_err(|_| format!("Invalid token count: {:?}", rest))?;
            ConsoleAction::Say(format!("Max tokens: {}", state.params.max_tokens))
        }
        "analyze" => ConsoleAction::Post(AppEvent::Analyze(state.params.clone())),
        "save" => ConsoleAction::Post(AppEvent::SaveSettings(state.params.clone())),
        "help" | "?" => ConsoleAction::Say(HELP.into()),
        "quit" | "exit" => ConsoleAction::Quit,
        other => return Err(format!("Unknown command: {} (try `help`)", other)),
    };
    Ok(action)
}

fn required<'a>(rest: &'a str, usage: &str) -> Result<&'a str, String> {
    if rest.is_empty() {
        Err(format!("Usage: {}", usage))
    } else {
        Ok(rest)
    }
}

/// Read commands from stdin until `quit` or EOF, then post `Shutdown`.
pub fn spawn_console(handle: AppHandle, mut state: ConsoleState) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            println!("{}", HELP);
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line, &mut state) {
                    Ok(ConsoleAction::Post(event)) => {
                        if !handle.post(event) {
                            return;
                        }
                    }
                    Ok(ConsoleAction::Say(text)) => println!("{}", text),
                    Ok(ConsoleAction::Quit) => break,
                    Ok(ConsoleAction::Nothing) => {}
                    Err(message) => eprintln!("{}", message),
                }
            }
            handle.post(AppEvent::Shutdown);
        })
}

/// Prints status changes and analysis results.
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn set_status(&mut self, text: &str) {
        println!("[status] {}", text);
    }

    fn set_results(&mut self, text: &str) {
        if !text.is_empty() {
            println!("[result]\n{}", text);
        }
    }
}

/// Stands in for an image widget: remembers what is shown and logs changes
/// of size, since preview frames arrive many times a second.
#[derive(Default)]
pub struct ConsoleDisplay {
    shown: Option<(u32, u32)>,
}

impl DisplaySink for ConsoleDisplay {
    fn show(&mut self, frame: &DisplayFrame) {
        let size = (frame.width, frame.height);
        if self.shown != Some(size) {
            log::info!("Displaying {}x{} image", frame.width, frame.height);
        }
        self.shown = Some(size);
    }

    fn clear(&mut self) {
        self.shown = None;
    }
}
