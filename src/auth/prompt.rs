use super::DeviceCodeResponse;
use std::process::{Command, Stdio};

/// The user-facing side of the interactive and device flows.
pub trait UserPrompt: Send + Sync {
    /// Sends the user to `url`, normally by opening their browser.
    fn open_url(&self, url: &str) -> std::io::Result<()>;

    /// Tells the user where to enter the device code.
    fn show_device_code(&self, device: &DeviceCodeResponse);
}

/// Opens the system browser and prints device-code instructions to stdout.
pub struct SystemPrompt;

impl UserPrompt for SystemPrompt {
    fn open_url(&self, url: &str) -> std::io::Result<()> {
        // A launcher can succeed without the page ever showing up
        println!("Opening your browser to sign in. If it does not open, visit:\n{}", url);

        browser_command(std::env::consts::OS, url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }

    fn show_device_code(&self, device: &DeviceCodeResponse) {
        println!("{}", device.instructions());
    }
}

/// Launcher for `url` on `os`. The URL is always a single argument handed
/// to a program that does no shell parsing, so `&` in the query survives.
fn browser_command(os: &str, url: &str) -> Command {
    let mut command = match os {
        "macos" => Command::new("open"),
        "windows" => {
            let mut c = Command::new("rundll32");
            c.arg("url.dll,FileProtocolHandler");
            c
        }
        _ => Command::new("xdg-open"),
    };
    command.arg(url);
    command
}
