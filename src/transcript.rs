//! Ordered chat bubbles backing both live rendering and plain-text export.

use serde::Serialize;
use std::fmt;
use std::path::Path;

pub const DEFAULT_EXPORT_FILE: &str = "assistant-conversation.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One rendered transcript entry.
///
/// `text` is what a reader sees; `html` is the markup a browser renders.
/// Both always describe the same content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bubble {
    pub role: Role,
    text: String,
    html: String,
    sealed: bool,
}

impl Bubble {
    fn new(role: Role, text: &str) -> Self {
        Bubble {
            role,
            text: text.to_string(),
            html: render_fragment(text),
            sealed: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// Sealed bubbles no longer accept streamed text.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    bubbles: Vec<Bubble>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bubbles(&self) -> &[Bubble] {
        &self.bubbles
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    pub fn last(&self) -> Option<&Bubble> {
        self.bubbles.last()
    }

    /// Add a finished user bubble followed by an empty, live assistant bubble.
    pub fn begin_exchange(&mut self, question: &str) {
        self.seal_last();
        let mut user = Bubble::new(Role::User, question);
        user.sealed = true;
        self.bubbles.push(user);
        self.bubbles.push(Bubble::new(Role::Assistant, ""));
    }

    /// Append a streamed fragment to the live assistant bubble. Returns
    /// false when there is no live bubble to append to.
    pub fn append(&mut self, fragment: &str) -> bool {
        match self.live_bubble() {
            Some(bubble) => {
                bubble.text.push_str(fragment);
                bubble.html.push_str(&render_fragment(fragment));
                true
            }
            None => false,
        }
    }

    /// Replace the live assistant bubble's content with an error message and
    /// seal it.
    pub fn show_error(&mut self, message: &str) -> bool {
        match self.live_bubble() {
            Some(bubble) => {
                bubble.text = format!("Error: {message}");
                bubble.html = format!("<p>Error: {}</p>", escape_html(message));
                bubble.sealed = true;
                true
            }
            None => false,
        }
    }

    pub fn seal_last(&mut self) {
        if let Some(bubble) = self.bubbles.last_mut() {
            bubble.sealed = true;
        }
    }

    fn live_bubble(&mut self) -> Option<&mut Bubble> {
        self.bubbles
            .last_mut()
            .filter(|b| b.role == Role::Assistant && !b.sealed)
    }

    /// Plain-text export: `"<Role>: <text>"` per bubble, blank-line joined.
    /// Live bubbles export whatever has arrived so far.
    pub fn export(&self) -> String {
        self.bubbles
            .iter()
            .map(|b| format!("{}: {}", b.role, b.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.export())
    }
}

/// Escape text for insertion into HTML.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a fragment and turn newlines into `<br>`.
pub fn render_fragment(s: &str) -> String {
    escape_html(s).replace('\n', "<br>")
}
