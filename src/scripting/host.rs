use super::completion::CompletionFlag;
use super::operation::Operation;
use super::value::Handle;

/// The embedding application, as seen by the bridge
///
/// `operations` is the static list of host operations. It is called again on
/// every environment rebuild, so it must return the complete set each time.
pub trait HostApi {
    /// Every operation the host exposes to guest code
    fn operations(&self) -> Vec<Operation>;

    /// Construct a host entity from a type name (used when a guest passes a
    /// string where a target is expected)
    fn construct_entity(&self, _type_name: &str) -> Option<Handle> {
        None
    }

    /// Flag the host raises once the asynchronous work identified by
    /// `subject` (or the host's current task, when `None`) completes
    fn watch_completion(&self, _subject: Option<&Handle>) -> Option<CompletionFlag> {
        None
    }
}

/// A host with no operations of its own; only the built-ins are published
pub struct NoHost;

impl HostApi for NoHost {
    fn operations(&self) -> Vec<Operation> {
        Vec::new()
    }
}

/// One named block of guest source supplied by the editor surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub content: String,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Join unit contents into one executable block; names are not interpreted
pub fn concat_sources(units: &[SourceUnit]) -> String {
    units
        .iter()
        .map(|unit| unit.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_sources_joins_with_newlines() {
        let units = vec![
            SourceUnit::new("main", "local a = 1"),
            SourceUnit::new("helpers", "local b = 2"),
        ];
        assert_eq!(concat_sources(&units), "local a = 1\nlocal b = 2");
        assert_eq!(concat_sources(&[]), "");
    }
}
