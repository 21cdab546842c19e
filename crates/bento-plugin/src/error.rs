//! Load-stage bookkeeping for plugin errors.

use std::fmt;

use bento_core::ProcessorError;

/// Where in the load sequence a plugin failed. Folded into the message of
/// the [`ProcessorError`] handed back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Opening,
    Entry,
    PortScan,
    Instantiation,
    Activation,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStage::Opening => write!(f, "opening library"),
            LoadStage::Entry => write!(f, "locating entry point"),
            LoadStage::PortScan => write!(f, "scanning ports"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

pub fn load_error(stage: LoadStage, reason: impl fmt::Display) -> ProcessorError {
    let message = format!("{}: {}", stage, reason);
    match stage {
        LoadStage::Opening => ProcessorError::SharedLibraryOpening(message),
        LoadStage::Entry => ProcessorError::EntryPointNotFound(message),
        LoadStage::PortScan => ProcessorError::PluginLoad(message),
        LoadStage::Instantiation | LoadStage::Activation => {
            ProcessorError::PluginInit(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_maps_to_category() {
        assert!(matches!(
            load_error(LoadStage::Opening, "no such file"),
            ProcessorError::SharedLibraryOpening(_)
        ));
        assert!(matches!(
            load_error(LoadStage::Entry, "symbol missing"),
            ProcessorError::EntryPointNotFound(_)
        ));
        assert!(matches!(
            load_error(LoadStage::Instantiation, "null instance"),
            ProcessorError::PluginInit(_)
        ));
    }
}
