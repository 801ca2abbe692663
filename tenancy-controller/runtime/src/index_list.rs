use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Feeds one watch into several indexes.
///
/// Updates reach indexes in the order they were pushed: an index may read
/// from any index pushed before it.
pub struct IndexList<A, T> {
    index: Arc<RwLock<A>>,
    tail: Option<T>,
}

impl<A, T, R> IndexNamespacedResource<R> for IndexList<A, T>
where
    A: IndexNamespacedResource<R>,
    T: IndexNamespacedResource<R>,
    R: Clone,
{
    fn apply(&mut self, resource: R) {
        if let Some(tail) = &mut self.tail {
            tail.apply(resource.clone());
        }
        self.index.write().apply(resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(tail) = &mut self.tail {
            tail.delete(namespace.clone(), name.clone());
        }
        self.index.write().delete(namespace, name);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        if let Some(tail) = &mut self.tail {
            tail.reset(resources.clone(), removed.clone());
        }
        self.index.write().reset(resources, removed);
    }
}

impl<A, T, R> IndexClusterResource<R> for IndexList<A, T>
where
    A: IndexClusterResource<R>,
    T: IndexClusterResource<R>,
    R: Clone,
{
    fn apply(&mut self, resource: R) {
        if let Some(tail) = &mut self.tail {
            tail.apply(resource.clone());
        }
        self.index.write().apply(resource);
    }

    fn delete(&mut self, name: String) {
        if let Some(tail) = &mut self.tail {
            tail.delete(name.clone());
        }
        self.index.write().delete(name);
    }

    fn reset(&mut self, resources: Vec<R>, removed: ClusterRemoved) {
        if let Some(tail) = &mut self.tail {
            tail.reset(resources.clone(), removed.clone());
        }
        self.index.write().reset(resources, removed);
    }
}

impl<A> IndexList<A, Nil> {
    pub fn new(index: Arc<RwLock<A>>) -> Self {
        Self { index, tail: None }
    }
}

impl<A, T> IndexList<A, T> {
    pub fn push<B>(self, index: Arc<RwLock<B>>) -> IndexList<B, IndexList<A, T>> {
        IndexList {
            index,
            tail: Some(self),
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

/// The end of a list; never holds an index.
pub enum Nil {}

impl<R> IndexNamespacedResource<R> for Nil {
    fn apply(&mut self, _: R) {
        match *self {}
    }

    fn delete(&mut self, _: String, _: String) {
        match *self {}
    }
}

impl<R> IndexClusterResource<R> for Nil {
    fn apply(&mut self, _: R) {
        match *self {}
    }

    fn delete(&mut self, _: String) {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl IndexClusterResource<String> for Recorder {
        fn apply(&mut self, resource: String) {
            self.seen.push(format!("apply {resource}"));
        }

        fn delete(&mut self, name: String) {
            self.seen.push(format!("delete {name}"));
        }
    }

    #[test]
    fn forwards_in_push_order() {
        let first = Arc::new(RwLock::new(Recorder::default()));
        let second = Arc::new(RwLock::new(Recorder::default()));
        let list = IndexList::new(first.clone()).push(second.clone()).shared();

        let mut list = list.write();
        IndexClusterResource::<String>::apply(&mut *list, "a".to_string());
        IndexClusterResource::<String>::delete(&mut *list, "a".to_string());
        IndexClusterResource::<String>::reset(
            &mut *list,
            vec!["b".to_string()],
            ClusterRemoved::from_iter(["c".to_string()]),
        );
        drop(list);

        for index in [first, second] {
            let seen = &index.read().seen;
            assert_eq!(seen[..2], ["apply a", "delete a"]);
            assert!(seen.contains(&"apply b".to_string()));
            assert!(seen.contains(&"delete c".to_string()));
        }
    }
}
