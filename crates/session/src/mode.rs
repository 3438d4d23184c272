use parley_client::StreamRequest;

/// Request-shaping toggles for the next send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeConfig {
    document_grounding_enabled: bool,
    active_document_id: Option<String>,
    web_search_enabled: bool,
}

/// Frozen view of [`ModeConfig`] taken when a send begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeSnapshot {
    pub document_id: Option<String>,
    pub web_search: bool,
}

impl ModeSnapshot {
    pub fn apply_to(&self, mut request: StreamRequest) -> StreamRequest {
        if let Some(document_id) = &self.document_id {
            request = request.with_document(document_id.clone());
        }
        request.with_search(self.web_search)
    }
}

impl ModeConfig {
    pub fn document_grounding_enabled(&self) -> bool {
        self.document_grounding_enabled
    }

    pub fn active_document_id(&self) -> Option<&str> {
        self.active_document_id.as_deref()
    }

    pub fn web_search_enabled(&self) -> bool {
        self.web_search_enabled
    }

    /// Turning grounding off forgets the document.
    pub fn set_document_grounding(&mut self, enabled: bool) {
        self.document_grounding_enabled = enabled;
        if !enabled {
            self.active_document_id = None;
        }
    }

    /// Records a freshly uploaded document and grounds subsequent sends on it.
    pub fn attach_document(&mut self, document_id: impl Into<String>) {
        self.active_document_id = Some(document_id.into());
        self.document_grounding_enabled = true;
    }

    pub fn set_web_search(&mut self, enabled: bool) {
        self.web_search_enabled = enabled;
    }

    pub fn toggle_web_search(&mut self) -> bool {
        self.web_search_enabled = !self.web_search_enabled;
        self.web_search_enabled
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        let document_id = if self.document_grounding_enabled {
            self.active_document_id.clone()
        } else {
            None
        };

        ModeSnapshot {
            document_id,
            web_search: self.web_search_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabling_grounding_clears_document() {
        let mut modes = ModeConfig::default();
        modes.attach_document("doc-1");
        assert!(modes.document_grounding_enabled());
        assert_eq!(modes.snapshot().document_id.as_deref(), Some("doc-1"));

        modes.set_document_grounding(false);
        assert_eq!(modes.active_document_id(), None);

        modes.set_document_grounding(true);
        assert_eq!(modes.snapshot().document_id, None);
    }

    #[test]
    fn snapshot_is_detached_from_later_toggles() {
        let mut modes = ModeConfig::default();
        let before = modes.snapshot();

        assert!(modes.toggle_web_search());
        assert!(!before.web_search);
        assert!(modes.snapshot().web_search);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut modes = ModeConfig::default();
        modes.attach_document("doc-1");
        modes.set_web_search(true);

        modes.reset();
        assert_eq!(modes, ModeConfig::default());
    }
}
