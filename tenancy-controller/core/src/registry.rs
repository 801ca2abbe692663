const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";

/// A parsed container image reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub image: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl Reference {
    /// Parses an image reference the way container runtimes resolve it: a
    /// leading component is a registry only if it looks like a host.
    pub fn parse(image: &str) -> Self {
        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (image, None),
        };

        let mut components = name.split('/').collect::<Vec<_>>();
        let registry = if components.len() > 1 && is_host(components[0]) {
            components.remove(0).to_string()
        } else {
            DEFAULT_REGISTRY.to_string()
        };

        let last = components.pop().unwrap_or_default();
        let (image, tag) = match last.rsplit_once(':') {
            Some((image, tag)) if !tag.is_empty() => (image, tag),
            _ => (last, DEFAULT_TAG),
        };

        Self {
            registry,
            repository: components.join("/"),
            image: image.to_string(),
            tag: tag.to_string(),
            digest,
        }
    }
}

fn is_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}
