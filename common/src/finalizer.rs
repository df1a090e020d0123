use kube::{Resource, ResourceExt};

/// Marker blocking the removal of a resource until its release is uninstalled
pub static DELETION_FINALIZER: &str = "deletion-finalizer";

pub fn has_deletion_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == DELETION_FINALIZER)
}

/// Returns true when the finalizer was not there yet
pub fn add_deletion_finalizer<K: Resource>(obj: &mut K) -> bool {
    if has_deletion_finalizer(obj) {
        return false;
    }
    obj.finalizers_mut().push(DELETION_FINALIZER.to_string());
    true
}

/// Returns true when the finalizer was present
pub fn remove_deletion_finalizer<K: Resource>(obj: &mut K) -> bool {
    if !has_deletion_finalizer(obj) {
        return false;
    }
    obj.finalizers_mut().retain(|f| f != DELETION_FINALIZER);
    true
}
