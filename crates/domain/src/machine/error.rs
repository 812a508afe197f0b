//! Construction-time validation errors for state graph definitions.

/// Why a state graph definition was rejected.
///
/// State and trigger names are carried as rendered strings so the error type
/// stays independent of the per-rule enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("state `{state}` is declared twice")]
    DuplicateState { state: String },

    #[error("state `{state}` refers to undeclared parent `{parent}`")]
    UnknownParent { state: String, parent: String },

    #[error("parent chain of state `{state}` loops back on itself")]
    ParentCycle { state: String },

    #[error("state `{state}` has children but no initial child")]
    MissingInitialChild { state: String },

    #[error("initial child `{child}` of `{state}` is not one of its children")]
    InitialNotChild { state: String, child: String },

    #[error("timeout declared on composite state `{state}`")]
    TimeoutOnComposite { state: String },

    #[error("transition on `{trigger}` has no source states")]
    NoSources { trigger: String },

    #[error("transition on `{trigger}` refers to undeclared source `{state}`")]
    UnknownSource { trigger: String, state: String },

    #[error("transition on `{trigger}` refers to undeclared destination `{state}`")]
    UnknownDest { trigger: String, state: String },

    #[error("initial state `{state}` is not declared")]
    UnknownInitial { state: String },
}
