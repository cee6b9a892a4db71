//! Strips terminal control sequences from captured pane text that would otherwise change the
//! state of the terminal rendering the dashboard: mouse-tracking, bracketed-paste and
//! alternate-screen mode toggles, SGR mouse reports, and OSC strings. Printable text, SGR
//! styling and cursor movement pass through untouched.

const MOUSE_TRACKING_MODES: [u16; 6] = [1000, 1002, 1003, 1005, 1006, 1015];
const BRACKETED_PASTE_MODE: u16 = 2004;
const ALTERNATE_SCREEN_MODES: [u16; 3] = [47, 1047, 1049];

const ESC: char = '\u{1b}';
const BEL: char = '\u{7}';

fn is_stripped_private_mode(mode: u16) -> bool {
    MOUSE_TRACKING_MODES.contains(&mode)
        || mode == BRACKETED_PASTE_MODE
        || ALTERNATE_SCREEN_MODES.contains(&mode)
}

fn is_csi_final_byte(character: char) -> bool {
    ('\u{40}'..='\u{7e}').contains(&character)
}

pub fn sanitize(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(character) = chars.next() {
        if character != ESC {
            cleaned.push(character);
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                let mut body = String::new();
                let mut final_char = None;
                for value in chars.by_ref() {
                    if is_csi_final_byte(value) {
                        final_char = Some(value);
                        break;
                    }
                    body.push(value);
                }
                let Some(final_char) = final_char else {
                    cleaned.push(ESC);
                    cleaned.push('[');
                    cleaned.push_str(&body);
                    break;
                };
                push_csi_unless_stripped(&mut cleaned, &body, final_char);
            }
            Some(']') => {
                let mut lookahead = chars.clone();
                lookahead.next();
                if skip_osc_sequence(&mut lookahead) {
                    chars = lookahead;
                } else {
                    cleaned.push(ESC);
                }
            }
            _ => cleaned.push(ESC),
        }
    }

    cleaned
}

fn push_csi_unless_stripped(cleaned: &mut String, body: &str, final_char: char) {
    if is_sgr_mouse_report(body, final_char) {
        return;
    }

    if let Some(modes) = body.strip_prefix('?')
        && matches!(final_char, 'h' | 'l')
    {
        let kept = retained_private_modes(modes);
        if kept.is_empty() {
            return;
        }
        cleaned.push(ESC);
        cleaned.push_str("[?");
        cleaned.push_str(&kept);
        cleaned.push(final_char);
        return;
    }

    cleaned.push(ESC);
    cleaned.push('[');
    cleaned.push_str(body);
    cleaned.push(final_char);
}

/// A private-mode set/reset may toggle several modes at once (`ESC[?1000;1006h`). Targeted
/// modes are dropped from the list and any others are kept.
fn retained_private_modes(modes: &str) -> String {
    modes
        .split(';')
        .filter(|mode| {
            mode.parse::<u16>()
                .map_or(true, |value| !is_stripped_private_mode(value))
        })
        .collect::<Vec<&str>>()
        .join(";")
}

fn is_sgr_mouse_report(body: &str, final_char: char) -> bool {
    if !matches!(final_char, 'M' | 'm') {
        return false;
    }
    let Some(fields) = body.strip_prefix('<') else {
        return false;
    };

    let parts: Vec<&str> = fields.split(';').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_digit()))
}

/// Advances past an OSC body and its BEL or ST terminator. Returns `false` when no
/// terminator follows, in which case the caller keeps the bytes as they are.
fn skip_osc_sequence<I>(chars: &mut std::iter::Peekable<I>) -> bool
where
    I: Iterator<Item = char>,
{
    while let Some(character) = chars.next() {
        if character == BEL {
            return true;
        }

        if character == ESC && chars.next_if_eq(&'\\').is_some() {
            return true;
        }
    }
    false
}
