use std::fmt;

/// States of [`ODataWriterCore`](crate::ODataWriterCore).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriterState {
    Start,
    Resource,
    ResourceSet,
    /// A navigation link with no content yet; written as deferred if it is
    /// ended in this state.
    NavigationLink,
    NavigationLinkWithContent,
    Completed,
    Error,
}

impl WriterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Resource => "Resource",
            Self::ResourceSet => "ResourceSet",
            Self::NavigationLink => "NavigationLink",
            Self::NavigationLinkWithContent => "NavigationLinkWithContent",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    pub fn is_navigation_link(&self) -> bool {
        matches!(self, Self::NavigationLink | Self::NavigationLinkWithContent)
    }
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of [`ODataDeltaWriter`](crate::ODataDeltaWriter).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeltaWriterState {
    Start,
    DeltaFeed,
    DeltaEntry,
    DeltaDeletedEntry,
    DeltaLink,
    DeltaDeletedLink,
    /// Expanded content of a delta entry, handed to a nested writer.
    ExpandedNavigationProperty,
    Completed,
    Error,
}

impl DeltaWriterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::DeltaFeed => "DeltaResourceSet",
            Self::DeltaEntry => "DeltaResource",
            Self::DeltaDeletedEntry => "DeltaDeletedEntry",
            Self::DeltaLink => "DeltaLink",
            Self::DeltaDeletedLink => "DeltaDeletedLink",
            Self::ExpandedNavigationProperty => "ExpandedNavigationProperty",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for DeltaWriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
