//! 处理器注册表
//!
//! 写时复制：读者拿到的是不可变快照（Arc），写者串行地构造新快照后整体替换，
//! 因此查询永远不会看到一半生效的注册。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::core::DescriptorError;
use crate::registry::HandlerDescriptor;

/// 某一时刻的注册表内容；顺序即注册顺序
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    order: Vec<Arc<HandlerDescriptor>>,
    by_id: HashMap<String, Arc<HandlerDescriptor>>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<Arc<HandlerDescriptor>> {
        self.by_id.get(id).cloned()
    }

    /// 含有该标签的描述符，按注册顺序
    pub fn by_capability(&self, tag: &str) -> Vec<Arc<HandlerDescriptor>> {
        self.order
            .iter()
            .filter(|d| d.capability_tags.contains(tag))
            .cloned()
            .collect()
    }

    /// 能力标签为 `tags` 超集的描述符，按注册顺序
    pub fn matching_all<S: AsRef<str>>(&self, tags: &[S]) -> Vec<Arc<HandlerDescriptor>> {
        self.order
            .iter()
            .filter(|d| d.has_capabilities(tags))
            .cloned()
            .collect()
    }

    pub fn by_process(&self, process_id: &str) -> Vec<Arc<HandlerDescriptor>> {
        self.order
            .iter()
            .filter(|d| d.target_processes.contains(process_id))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<HandlerDescriptor>> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// 处理器注册表：多读单写，可在多个运行之间共享
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前快照；持有期间不受后续写入影响
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// 注册新描述符；id 重复或描述符非法时失败，失败不改变注册表
    pub fn register(
        &self,
        descriptor: HandlerDescriptor,
    ) -> Result<Arc<HandlerDescriptor>, DescriptorError> {
        descriptor.validate()?;

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        if current.by_id.contains_key(&descriptor.id) {
            return Err(DescriptorError::DuplicateId(descriptor.id));
        }

        let descriptor = Arc::new(descriptor);
        let mut next = RegistrySnapshot::clone(&current);
        next.order.push(Arc::clone(&descriptor));
        next.by_id
            .insert(descriptor.id.clone(), Arc::clone(&descriptor));
        self.publish(next);

        tracing::debug!(handler = %descriptor.id, kind = %descriptor.kind, "handler registered");
        Ok(descriptor)
    }

    /// 整体替换已注册的描述符（保持原注册位置）；kind 不可改变
    pub fn replace(
        &self,
        descriptor: HandlerDescriptor,
    ) -> Result<Arc<HandlerDescriptor>, DescriptorError> {
        descriptor.validate()?;

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let existing = current
            .by_id
            .get(&descriptor.id)
            .ok_or_else(|| DescriptorError::NotRegistered(descriptor.id.clone()))?;
        if existing.kind != descriptor.kind {
            return Err(DescriptorError::InvalidDescriptor {
                id: descriptor.id.clone(),
                reason: format!(
                    "kind is immutable (registered as {}, got {})",
                    existing.kind, descriptor.kind
                ),
            });
        }

        let descriptor = Arc::new(descriptor);
        let mut next = RegistrySnapshot::clone(&current);
        for slot in next.order.iter_mut() {
            if slot.id == descriptor.id {
                *slot = Arc::clone(&descriptor);
            }
        }
        next.by_id
            .insert(descriptor.id.clone(), Arc::clone(&descriptor));
        self.publish(next);

        tracing::debug!(handler = %descriptor.id, "handler replaced");
        Ok(descriptor)
    }

    /// 注销；不存在时为空操作。返回是否真的移除了
    pub fn unregister(&self, id: &str) -> bool {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        if !current.by_id.contains_key(id) {
            return false;
        }

        let mut next = RegistrySnapshot::clone(&current);
        next.order.retain(|d| d.id != id);
        next.by_id.remove(id);
        self.publish(next);

        tracing::debug!(handler = %id, "handler unregistered");
        true
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<Arc<HandlerDescriptor>> {
        self.snapshot().get(id)
    }

    pub fn lookup_by_capability(&self, tag: &str) -> Vec<Arc<HandlerDescriptor>> {
        self.snapshot().by_capability(tag)
    }

    pub fn lookup_by_process(&self, process_id: &str) -> Vec<Arc<HandlerDescriptor>> {
        self.snapshot().by_process(process_id)
    }

    /// 全部 id，按注册顺序
    pub fn ids(&self) -> Vec<String> {
        self.snapshot().iter().map(|d| d.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn publish(&self, next: RegistrySnapshot) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(id: &str, tags: &[&str]) -> HandlerDescriptor {
        HandlerDescriptor::skill(id).with_tags(tags.iter().copied())
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = HandlerRegistry::new();
        let d = skill("fmt", &["format"]);
        registry.register(d.clone()).unwrap();

        assert_eq!(*registry.lookup_by_id("fmt").unwrap(), d);
        assert!(registry.lookup_by_id("nope").is_none());
    }

    #[test]
    fn test_duplicate_id_leaves_state_unchanged() {
        let registry = HandlerRegistry::new();
        registry.register(skill("fmt", &["format"])).unwrap();
        let before = registry.ids();

        let err = registry.register(skill("fmt", &["other"])).unwrap_err();
        assert_eq!(err, DescriptorError::DuplicateId("fmt".into()));
        assert_eq!(registry.ids(), before);
        assert!(registry.lookup_by_capability("other").is_empty());
    }

    #[test]
    fn test_capability_lookup_keeps_registration_order() {
        let registry = HandlerRegistry::new();
        registry.register(skill("b", &["lint"])).unwrap();
        registry.register(skill("a", &["lint", "format"])).unwrap();
        registry.register(skill("c", &["format"])).unwrap();

        let ids: Vec<String> = registry
            .lookup_by_capability("lint")
            .iter()
            .map(|d| d.id.clone())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = HandlerRegistry::new();
        registry.register(skill("fmt", &["format"])).unwrap();
        assert!(registry.unregister("fmt"));
        assert!(!registry.unregister("fmt"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replace_keeps_position_and_kind() {
        let registry = HandlerRegistry::new();
        registry.register(skill("a", &["x"])).unwrap();
        registry.register(skill("b", &["x"])).unwrap();

        registry
            .replace(skill("a", &["x", "y"]).with_description("v2"))
            .unwrap();
        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert_eq!(registry.lookup_by_id("a").unwrap().description, "v2");

        let err = registry
            .replace(HandlerDescriptor::agent("a").with_tags(["x"]))
            .unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidDescriptor { .. }));

        let err = registry.replace(skill("zzz", &["x"])).unwrap_err();
        assert_eq!(err, DescriptorError::NotRegistered("zzz".into()));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let registry = HandlerRegistry::new();
        registry.register(skill("a", &["x"])).unwrap();
        let snapshot = registry.snapshot();

        registry.register(skill("b", &["x"])).unwrap();
        registry.unregister("a");

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("a").is_some());
        assert_eq!(registry.ids(), vec!["b"]);
    }

    #[test]
    fn test_lookup_by_process() {
        let registry = HandlerRegistry::new();
        registry
            .register(skill("a", &["x"]).for_process("release"))
            .unwrap();
        registry.register(skill("b", &["x"])).unwrap();
        let found = registry.lookup_by_process("release");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let registry = Arc::new(HandlerRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..50 {
                    registry.register(skill(&format!("h{i}"), &["x"])).unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let snapshot = registry.snapshot();
                        assert_eq!(snapshot.by_capability("x").len(), snapshot.len());
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.len(), 50);
    }
}
