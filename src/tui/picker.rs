//! Terminal graphics protocol selection for ratatui-image.
//!
//! Tries, in order: an explicit `--graphics` choice, a stdio capability
//! query, environment heuristics, then halfblocks.

use ratatui_image::picker::{Picker, ProtocolType};
use tracing::{info, warn};

/// Must be called BEFORE entering raw mode / alternate screen.
pub fn create_picker(force_protocol: Option<&str>) -> Picker {
    if let Some(name) = force_protocol {
        match parse_protocol(name) {
            Some(proto_type) => {
                let mut picker = Picker::halfblocks();
                picker.set_protocol_type(proto_type);
                info!("Graphics: forced {:?}", proto_type);
                return picker;
            }
            None => warn!("Unknown graphics protocol '{}', using auto-detect", name),
        }
    }

    match Picker::from_query_stdio() {
        Ok(picker) => {
            info!("Graphics: detected {:?}", picker.protocol_type());
            picker
        }
        Err(_) => {
            let proto = protocol_from_env(
                &std::env::var("TERM_PROGRAM").unwrap_or_default(),
                &std::env::var("TERM").unwrap_or_default(),
                std::env::var_os("WT_SESSION").is_some(),
            );
            info!("Graphics: {:?} (env heuristic)", proto);
            let mut picker = Picker::halfblocks();
            if proto != ProtocolType::Halfblocks {
                picker.set_protocol_type(proto);
            }
            picker
        }
    }
}

fn parse_protocol(name: &str) -> Option<ProtocolType> {
    match name.to_lowercase().as_str() {
        "sixel" => Some(ProtocolType::Sixel),
        "kitty" => Some(ProtocolType::Kitty),
        "iterm2" | "iterm" => Some(ProtocolType::Iterm2),
        "halfblocks" | "half" | "text" => Some(ProtocolType::Halfblocks),
        _ => None,
    }
}

/// Guess the protocol from the variables WezTerm, Kitty, iTerm2, Ghostty
/// and Windows Terminal set
fn protocol_from_env(term_program: &str, term: &str, windows_terminal: bool) -> ProtocolType {
    if term_program.contains("WezTerm") {
        ProtocolType::Sixel
    } else if term_program.contains("iTerm") {
        ProtocolType::Iterm2
    } else if term.contains("xterm-kitty") || term_program.contains("kitty") {
        ProtocolType::Kitty
    } else if term_program.to_lowercase().contains("ghostty") {
        ProtocolType::Kitty
    } else if windows_terminal {
        ProtocolType::Sixel
    } else {
        ProtocolType::Halfblocks
    }
}
