/// Reply keyboard change carried by a text reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Keyboard {
    /// One-time button rows.
    Buttons(Vec<Vec<String>>),
    Remove,
}

/// What the bot sends back, independent of the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text {
        text: String,
        keyboard: Option<Keyboard>,
        /// Send with HTML parse mode.
        html: bool,
    },
    Document {
        file_name: String,
        bytes: Vec<u8>,
        caption: String,
    },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            keyboard: None,
            html: false,
        }
    }

    /// HTML text. Interpolated user input must go through [`escape_html`].
    pub fn html(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            keyboard: None,
            html: true,
        }
    }

    pub fn with_buttons(self, rows: Vec<Vec<String>>) -> Self {
        self.with_keyboard(Keyboard::Buttons(rows))
    }

    pub fn removing_keyboard(self) -> Self {
        self.with_keyboard(Keyboard::Remove)
    }

    fn with_keyboard(self, new: Keyboard) -> Self {
        match self {
            Reply::Text { text, html, .. } => Reply::Text {
                text,
                keyboard: Some(new),
                html,
            },
            document => document,
        }
    }

    /// Text of a text reply.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Text { text, .. } => Some(text),
            Reply::Document { .. } => None,
        }
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
