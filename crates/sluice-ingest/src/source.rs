//! Sources: named groups of resources run together

use crate::error::{IngestError, Result};
use crate::resource::Resource;
use sluice_common::WriteDisposition;
use std::collections::HashSet;

/// A named, ordered collection of resources with unique names
#[derive(Debug, Clone)]
pub struct Source {
    name: String,
    resources: Vec<Resource>,
    default_write_disposition: Option<WriteDisposition>,
}

impl Source {
    /// Group resources; duplicate resource names are rejected.
    pub fn new(name: impl Into<String>, resources: Vec<Resource>) -> Result<Self> {
        let mut seen = HashSet::new();
        for resource in &resources {
            if !seen.insert(resource.name()) {
                return Err(IngestError::DuplicateResource(resource.name().to_string()));
            }
        }

        Ok(Self {
            name: name.into(),
            resources,
            default_write_disposition: None,
        })
    }

    /// Source holding a single resource, named after it
    pub fn single(resource: Resource) -> Self {
        Self {
            name: resource.name().to_string(),
            resources: vec![resource],
            default_write_disposition: None,
        }
    }

    /// Disposition for resources that declare none
    pub fn default_write_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.default_write_disposition = Some(disposition);
        self
    }

    pub fn default_disposition(&self) -> Option<WriteDisposition> {
        self.default_write_disposition
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name() == name)
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<()> {
        if self.resource(resource.name()).is_some() {
            return Err(IngestError::DuplicateResource(resource.name().to_string()));
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Keep only the named resources, in source order.
    pub fn with_resources(mut self, names: &[&str]) -> Result<Self> {
        if let Some(unknown) = names.iter().find(|n| self.resource(n).is_none()) {
            return Err(IngestError::UnknownResource(unknown.to_string()));
        }
        self.resources.retain(|r| names.contains(&r.name()));
        Ok(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn blog() -> Source {
        Source::new(
            "blog_source",
            vec![
                Resource::from_records("posts", vec![]),
                Resource::from_records("comments", vec![]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Source::new(
            "dup",
            vec![
                Resource::from_records("users", vec![]),
                Resource::from_records("users", vec![]),
            ],
        );
        assert!(matches!(result, Err(IngestError::DuplicateResource(name)) if name == "users"));

        let mut source = blog();
        assert!(source.add_resource(Resource::from_records("posts", vec![])).is_err());
        assert!(source.add_resource(Resource::from_records("authors", vec![])).is_ok());
        assert_eq!(source.resources().len(), 3);
    }

    #[test]
    fn test_with_resources_selects_in_source_order() {
        let selected = blog().with_resources(&["comments", "posts"]).unwrap();
        let names: Vec<&str> = selected.resources().iter().map(Resource::name).collect();
        assert_eq!(names, vec!["posts", "comments"]);

        let only = blog().with_resources(&["comments"]).unwrap();
        assert_eq!(only.resources().len(), 1);
    }

    #[test]
    fn test_with_unknown_resource_fails() {
        let result = blog().with_resources(&["genome"]);
        assert!(matches!(result, Err(IngestError::UnknownResource(name)) if name == "genome"));
    }
}
