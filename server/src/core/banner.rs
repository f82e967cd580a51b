//! Startup banner

use std::path::Path;

use super::config::AuthMethod;
use super::constants::APP_NAME;

// Label width for alignment
const W: usize = 10;

fn is_all_interfaces(host: &str) -> bool {
    host == "0.0.0.0" || host == "::" || host == "[::]"
}

/// Dashboard URL to show; `localhost` when bound to all interfaces
pub fn display_url(host: &str, port: u16) -> String {
    let display_host = if is_all_interfaces(host) {
        "localhost"
    } else {
        host
    };
    format!("http://{}:{}", display_host, port)
}

fn method_line(method: Option<AuthMethod>) -> String {
    match method {
        None => "\x1b[33msetup required\x1b[0m, open the dashboard to choose a method".to_string(),
        Some(AuthMethod::None) => "\x1b[31mdisabled\x1b[0m (every visitor is admin)".to_string(),
        Some(method) => method.to_string(),
    }
}

/// Print the startup banner
pub fn print_banner(host: &str, port: u16, method: Option<AuthMethod>, config_path: &Path) {
    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m \x1b[36m{}\x1b[0m",
        "Dashboard:",
        display_url(host, port)
    );
    println!(
        "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Auth:",
        method_line(method)
    );
    if host == "127.0.0.1" || host == "localhost" {
        println!(
            "  \x1b[90m➜  {:<W$} use --host 0.0.0.0 to expose\x1b[0m",
            "Network:"
        );
    }
    println!(
        "  \x1b[90m➜  {:<W$} {}\x1b[0m",
        "Config:",
        config_path.display()
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_url() {
        assert_eq!(display_url("0.0.0.0", 7575), "http://localhost:7575");
        assert_eq!(display_url("192.168.1.10", 80), "http://192.168.1.10:80");
    }

    #[test]
    fn test_method_line() {
        assert!(method_line(None).contains("setup required"));
        assert!(method_line(Some(AuthMethod::None)).contains("disabled"));
        assert_eq!(method_line(Some(AuthMethod::Oidc)), "oidc");
    }
}
