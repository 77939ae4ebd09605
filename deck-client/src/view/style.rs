//! Colour escapes embedded in shell output. Presentation only: nothing here
//! feeds back into session state.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsiColor {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
}

impl AnsiColor {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "31" => Some(AnsiColor::Red),
            "32" => Some(AnsiColor::Green),
            "33" => Some(AnsiColor::Yellow),
            "34" => Some(AnsiColor::Blue),
            "35" => Some(AnsiColor::Magenta),
            "36" => Some(AnsiColor::Cyan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    pub text: String,
    pub color: Option<AnsiColor>,
}

/// Splits `text` on `ESC[<n>m` sequences. Colours nest: `ESC[0m` returns to
/// the colour that was active before the innermost one. Other sequences are
/// dropped.
pub fn parse_ansi(text: &str) -> Vec<StyledSpan> {
    let mut spans = Vec::new();
    let mut stack: Vec<AnsiColor> = Vec::new();
    let mut current = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find("\x1b[") {
        current.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let Some(end) = after.find(|c: char| !(c.is_ascii_digit() || c == ';')) else {
            rest = "";
            break;
        };
        let params = &after[..end];
        let terminator = after[end..].chars().next();
        rest = &after[end + terminator.map_or(0, char::len_utf8)..];

        if terminator != Some('m') {
            continue;
        }
        let change = if params == "0" || params.is_empty() {
            Some(None)
        } else {
            AnsiColor::from_code(params).map(Some)
        };
        let Some(change) = change else {
            continue;
        };

        flush(&mut spans, &mut current, stack.last().copied());
        match change {
            Some(color) => stack.push(color),
            None => {
                stack.pop();
            }
        }
    }
    current.push_str(rest);
    flush(&mut spans, &mut current, stack.last().copied());
    spans
}

fn flush(spans: &mut Vec<StyledSpan>, current: &mut String, color: Option<AnsiColor>) {
    if current.is_empty() {
        return;
    }
    spans.push(StyledSpan {
        text: std::mem::take(current),
        color,
    });
}
