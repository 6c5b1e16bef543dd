use axum::response::sse::Event as SseEvent;

const MERGE_FRAGMENTS: &str = "datastar-merge-fragments";
const EXECUTE_SCRIPT: &str = "datastar-execute-script";

/// How a client applies a fragment to the element its selector matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Replace the element wholesale.
    Outer,
    /// Diff the fragment into the existing element.
    Morph,
}

impl MergeMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Outer => "outer",
            Self::Morph => "morph",
        }
    }
}

/// One UI instruction sent down a streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    MergeFragments {
        selector: &'static str,
        mode: MergeMode,
        html: String,
    },
    /// Navigate the browser elsewhere.
    Redirect(String),
    Heartbeat,
}

impl Patch {
    pub fn outer(selector: &'static str, html: String) -> Self {
        Self::MergeFragments {
            selector,
            mode: MergeMode::Outer,
            html,
        }
    }

    pub fn morph(selector: &'static str, html: String) -> Self {
        Self::MergeFragments {
            selector,
            mode: MergeMode::Morph,
            html,
        }
    }

    /// The `data:` payload, one line per field.
    fn data(&self) -> String {
        match self {
            Self::MergeFragments {
                selector,
                mode,
                html,
            } => {
                let mut data = format!("selector {selector}\nmergeMode {}", mode.as_str());
                for line in html.lines() {
                    data.push_str("\nfragments ");
                    data.push_str(&line.replace('\r', ""));
                }
                data
            },
            Self::Redirect(url) => {
                let target = serde_json::to_string(url).unwrap_or_else(|_| "\"/\"".to_string());
                format!("autoRemove true\nscript window.location.href = {target};")
            },
            Self::Heartbeat => "autoRemove true\nscript void 0;".to_string(),
        }
    }

    fn event_name(&self) -> &'static str {
        match self {
            Self::MergeFragments { .. } => MERGE_FRAGMENTS,
            Self::Redirect(_) | Self::Heartbeat => EXECUTE_SCRIPT,
        }
    }

    /// Encode as an SSE event, tagging it with the envelope id that caused
    /// it so a reconnecting client can resume after it.
    pub fn into_event(self, id: Option<u64>) -> SseEvent {
        let event = SseEvent::default()
            .event(self.event_name())
            .data(self.data());
        match id {
            Some(id) => event.id(id.to_string()),
            None => event,
        }
    }
}
