use std::io::Write;
use std::path::PathBuf;

use tracing::warn;
use uuid::Uuid;

use crate::format::{dump_arguments, escape_html, format, format_arguments};
use crate::protocol::ToolExecutionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    UserMessage,
    AssistantMessage,
    ToolExecutionBlock,
    TypingIndicator,
}

impl EntryKind {
    fn css_class(self) -> &'static str {
        match self {
            EntryKind::UserMessage => "message user",
            EntryKind::AssistantMessage => "message assistant",
            EntryKind::ToolExecutionBlock => "tool-execution",
            EntryKind::TypingIndicator => "typing-indicator",
        }
    }
}

/// One rendered node. `text` is the plain source, `markup` the escaped HTML.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub kind: EntryKind,
    pub text: String,
    pub markup: String,
}

impl TranscriptEntry {
    fn new(kind: EntryKind, text: String, markup: String) -> Self {
        Self { id: Uuid::new_v4(), kind, text, markup }
    }
}

/// Display surface the transcript renders into.
pub trait TranscriptView {
    fn append(&mut self, entry: TranscriptEntry);
    /// Returns whether an entry with `id` was present.
    fn remove(&mut self, id: Uuid) -> bool;
    fn scroll_to_latest(&mut self);
}

pub struct Transcript<V: TranscriptView> {
    view: V,
    typing: Option<Uuid>,
}

impl<V: TranscriptView> Transcript<V> {
    pub fn new(view: V) -> Self {
        Self { view, typing: None }
    }

    #[cfg(test)]
    pub fn view(&self) -> &V {
        &self.view
    }

    #[cfg(test)]
    pub fn is_typing(&self) -> bool {
        self.typing.is_some()
    }

    pub fn append_user_message(&mut self, text: &str) {
        self.push(EntryKind::UserMessage, text.to_string(), format(text));
    }

    pub fn append_assistant_message(&mut self, text: &str) {
        self.push(EntryKind::AssistantMessage, text.to_string(), format(text));
    }

    pub fn append_tool_executions(&mut self, records: &[ToolExecutionRecord]) {
        for record in records {
            let text = format!(
                "{}\n{}\n{}",
                record.name,
                dump_arguments(&record.arguments),
                record.result
            );
            let markup = format!(
                "<div class=\"tool-name\">{}</div>\
                 <pre class=\"tool-args\">{}</pre>\
                 <div class=\"tool-result\">{}</div>",
                escape_html(&record.name),
                format_arguments(&record.arguments),
                format(&record.result),
            );
            self.push(EntryKind::ToolExecutionBlock, text, markup);
        }
    }

    pub fn show_typing(&mut self) {
        if self.typing.is_some() {
            return;
        }
        let entry = TranscriptEntry::new(
            EntryKind::TypingIndicator,
            String::new(),
            "<span></span><span></span><span></span>".to_string(),
        );
        self.typing = Some(entry.id);
        self.view.append(entry);
        self.view.scroll_to_latest();
    }

    pub fn remove_typing(&mut self) {
        if let Some(id) = self.typing.take() {
            self.view.remove(id);
        }
        self.view.scroll_to_latest();
    }

    fn push(&mut self, kind: EntryKind, text: String, markup: String) {
        self.view.append(TranscriptEntry::new(kind, text, markup));
        self.view.scroll_to_latest();
    }
}

#[derive(Debug, Default)]
pub struct MemoryView {
    pub entries: Vec<TranscriptEntry>,
    pub scrolls: usize,
}

impl MemoryView {
    #[cfg(test)]
    pub fn count(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    #[cfg(test)]
    pub fn kinds(&self) -> Vec<EntryKind> {
        self.entries.iter().map(|e| e.kind).collect()
    }
}

impl TranscriptView for MemoryView {
    fn append(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    fn scroll_to_latest(&mut self) {
        self.scrolls += 1;
    }
}

/// Keeps a standalone HTML document of the transcript on disk.
pub struct HtmlFileView {
    path: PathBuf,
    inner: MemoryView,
}

impl HtmlFileView {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), inner: MemoryView::default() }
    }

    pub fn render_document(&self) -> String {
        let mut doc = String::from(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Chat transcript</title></head>\n<body><div id=\"chat-messages\">\n",
        );
        for e in &self.inner.entries {
            doc.push_str(&format!(
                "<div class=\"{}\" id=\"entry-{}\">{}</div>\n",
                e.kind.css_class(),
                e.id,
                e.markup
            ));
        }
        doc.push_str("</div></body></html>\n");
        doc
    }
}

impl TranscriptView for HtmlFileView {
    fn append(&mut self, entry: TranscriptEntry) {
        self.inner.append(entry);
    }

    fn remove(&mut self, id: Uuid) -> bool {
        self.inner.remove(id)
    }

    fn scroll_to_latest(&mut self) {
        if let Err(e) = std::fs::write(&self.path, self.render_document()) {
            warn!(path = %self.path.display(), error = %e, "failed to write transcript");
        }
    }
}

/// Plain-text transcript on stdout.
#[derive(Debug, Default)]
pub struct ConsoleView {
    typing_shown: bool,
}

impl TranscriptView for ConsoleView {
    fn append(&mut self, entry: TranscriptEntry) {
        let mut out = std::io::stdout().lock();
        let line = match entry.kind {
            EntryKind::UserMessage => format!("you> {}", entry.text),
            EntryKind::AssistantMessage => format!("assistant> {}", entry.text),
            EntryKind::ToolExecutionBlock => format!("tool> {}", entry.text.replace('\n', "\n      ")),
            EntryKind::TypingIndicator => {
                self.typing_shown = true;
                "assistant is typing...".to_string()
            }
        };
        let _ = writeln!(out, "{line}");
    }

    fn remove(&mut self, _id: Uuid) -> bool {
        std::mem::take(&mut self.typing_shown)
    }

    fn scroll_to_latest(&mut self) {
        let _ = std::io::stdout().flush();
    }
}

impl<V: TranscriptView> TranscriptView for Option<V> {
    fn append(&mut self, entry: TranscriptEntry) {
        if let Some(v) = self {
            v.append(entry);
        }
    }

    fn remove(&mut self, id: Uuid) -> bool {
        self.as_mut().is_some_and(|v| v.remove(id))
    }

    fn scroll_to_latest(&mut self) {
        if let Some(v) = self {
            v.scroll_to_latest();
        }
    }
}

/// Fans every operation out to two views.
pub struct TeeView<A, B> {
    pub first: A,
    pub second: B,
}

impl<A: TranscriptView, B: TranscriptView> TranscriptView for TeeView<A, B> {
    fn append(&mut self, entry: TranscriptEntry) {
        self.first.append(entry.clone());
        self.second.append(entry);
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let a = self.first.remove(id);
        let b = self.second.remove(id);
        a || b
    }

    fn scroll_to_latest(&mut self) {
        self.first.scroll_to_latest();
        self.second.scroll_to_latest();
    }
}
