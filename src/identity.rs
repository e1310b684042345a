use std::fmt::Display;

use crate::error::IdentityError;

/// Descriptive fields of a live external entity, e.g. a remote endpoint descriptor.
pub trait DescribedEntity {
    fn id(&self) -> &str;

    fn version(&self) -> Option<&str> {
        None
    }

    fn title(&self) -> Option<&str> {
        None
    }

    fn description(&self) -> Option<&str> {
        None
    }

    fn organization(&self) -> Option<&str> {
        None
    }
}

/// A snapshot identity of a [`DescribedEntity`], usable as a cache key.
///
/// Equality and hashing cover every captured field, not just the id. Two snapshots of the same entity are equal only
/// if nothing descriptive changed in between. Consequently an entity whose title or version changes gets a new
/// identity and the cache knows nothing about it until the next cycle has loaded it, even while the data under the
/// old identity is still there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryIdentity {
    id:           String,
    version:      Option<String>,
    title:        Option<String>,
    description:  Option<String>,
    organization: Option<String>,
}

impl EntryIdentity {
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdentityError::MissingId);
        }

        Ok(Self {
            id,
            version: None,
            title: None,
            description: None,
            organization: None,
        })
    }

    pub fn from_entity<E>(entity: &E) -> Result<Self, IdentityError>
    where
        E: DescribedEntity + ?Sized,
    {
        Ok(Self {
            version: entity.version().map(String::from),
            title: entity.title().map(String::from),
            description: entity.description().map(String::from),
            organization: entity.organization().map(String::from),
            ..Self::new(entity.id())?
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }
}

impl Display for EntryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{version}", self.id),
            None => f.write_str(&self.id),
        }
    }
}
