use std::fmt;

/// States of [`ODataReaderCore`](crate::ODataReaderCore).
///
/// Every state but `Start`, `Completed` and `Error` exposes an item through
/// [`ODataReaderCore::item`](crate::ODataReaderCore::item).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReaderState {
    Start,
    ResourceSetStart,
    ResourceSetEnd,
    /// The item is `None` for an expanded `null` resource.
    ResourceStart,
    ResourceEnd,
    NavigationLinkStart,
    NavigationLinkEnd,
    EntityReferenceLink,
    Completed,
    Error,
}

impl ReaderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::ResourceSetStart => "ResourceSetStart",
            Self::ResourceSetEnd => "ResourceSetEnd",
            Self::ResourceStart => "ResourceStart",
            Self::ResourceEnd => "ResourceEnd",
            Self::NavigationLinkStart => "NavigationLinkStart",
            Self::NavigationLinkEnd => "NavigationLinkEnd",
            Self::EntityReferenceLink => "EntityReferenceLink",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(
            self,
            Self::ResourceSetEnd | Self::ResourceEnd | Self::NavigationLinkEnd
        )
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
