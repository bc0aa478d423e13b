//! Terminal rendering of engine events
//!
//! One reply streams at a time. Replies that start while another is
//! streaming are buffered and printed whole once the live one finishes.

use std::io::{self, Write};

use persona_chat::chat::EngineEvent;
use persona_chat::types::{ChatMessage, MessageId, Sender};

/// Header printed before a message: avatar icon and sender label
pub fn message_header(message: &ChatMessage) -> String {
    let icon = message
        .avatar
        .as_ref()
        .map(|a| a.icon.as_str())
        .unwrap_or("");
    format!("{} {}: ", icon, message.sender.label())
}

/// The reply currently being written to the terminal
struct Live {
    id: MessageId,
    header: String,
    text: String,
}

struct Buffered {
    message: ChatMessage,
    done: bool,
}

pub struct ReplyPrinter<W: Write> {
    out: W,
    live: Option<Live>,
    pending: Vec<Buffered>,
}

impl<W: Write> ReplyPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            live: None,
            pending: Vec::new(),
        }
    }

    pub fn handle(&mut self, event: &EngineEvent) -> io::Result<()> {
        match event {
            EngineEvent::MessageAppended { message, .. } if !message.thinking && !message.sender.is_user() => {
                let done = message.sender == Sender::System;
                if self.live.is_none() && self.pending.is_empty() {
                    self.start(message.clone(), done)?;
                } else {
                    self.pending.push(Buffered {
                        message: message.clone(),
                        done,
                    });
                }
            }
            EngineEvent::FragmentReceived {
                message_id, fragment, ..
            } => match self.live {
                Some(ref mut live) if live.id == *message_id => {
                    live.text.push_str(fragment);
                    write!(self.out, "{}", fragment)?;
                }
                _ => {
                    if let Some(entry) = self.pending.iter_mut().find(|b| b.message.id == *message_id) {
                        entry.message.text.push_str(fragment);
                    }
                }
            },
            EngineEvent::MessageFinalized { message, .. } => {
                if self.live.as_ref().is_some_and(|l| l.id == message.id) {
                    self.finish_live(message)?;
                    self.promote()?;
                } else if let Some(entry) = self.pending.iter_mut().find(|b| b.message.id == message.id) {
                    entry.message = message.clone();
                    entry.done = true;
                }
            }
            EngineEvent::MessageRemoved { message_id, .. } => {
                if self.live.as_ref().is_some_and(|l| l.id == *message_id) {
                    self.live = None;
                    writeln!(self.out)?;
                    self.promote()?;
                } else {
                    self.pending.retain(|b| b.message.id != *message_id);
                }
            }
            EngineEvent::TitleChanged { title, .. } => writeln!(self.out, "\n[title] {}", title)?,
            EngineEvent::TurnCompleted { .. } => {
                if self.live.take().is_some() {
                    writeln!(self.out)?;
                }
                for entry in std::mem::take(&mut self.pending) {
                    writeln!(self.out, "\n{}{}", message_header(&entry.message), entry.message.text)?;
                }
                writeln!(self.out)?;
            }
            _ => {}
        }
        self.out.flush()
    }

    /// Print a message's header and text; unfinished ones become live
    fn start(&mut self, message: ChatMessage, done: bool) -> io::Result<()> {
        let header = message_header(&message);
        write!(self.out, "\n{}{}", header, message.text)?;
        if done {
            writeln!(self.out)?;
        } else {
            self.live = Some(Live {
                id: message.id,
                header,
                text: message.text,
            });
        }
        Ok(())
    }

    /// End the live reply, reprinting it when the final sender or text differs
    fn finish_live(&mut self, message: &ChatMessage) -> io::Result<()> {
        writeln!(self.out)?;
        if let Some(live) = self.live.take() {
            let header = message_header(message);
            if header != live.header || message.text != live.text {
                writeln!(self.out, "{}{}", header, message.text)?;
            }
        }
        Ok(())
    }

    /// Print buffered replies in arrival order until one is still streaming
    fn promote(&mut self) -> io::Result<()> {
        while self.live.is_none() && !self.pending.is_empty() {
            let entry = self.pending.remove(0);
            self.start(entry.message, entry.done)?;
        }
        Ok(())
    }
}
