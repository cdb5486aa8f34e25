//! Read and write status conditions on any registered kind.
//!
//! Access goes through the condition accessor recorded in the
//! [`Scheme`](crate::scheme::Scheme); kinds registered without one report
//! [`KubetracerError::ConditionsUnsupported`].

use crate::error::KubetracerError;
use crate::object::{Condition, Object};
use crate::scheme::Scheme;
use crate::Result;

fn unsupported<T: Object>(scheme: &Scheme) -> KubetracerError {
    match scheme.kind_of::<T>() {
        Ok(gvk) => KubetracerError::conditions_unsupported(gvk.kind.clone()),
        Err(e) => e,
    }
}

/// All conditions of `obj`
pub fn get_conditions<T: Object>(obj: &T, scheme: &Scheme) -> Result<Vec<Condition>> {
    scheme.conditions(obj).ok_or_else(|| unsupported::<T>(scheme))
}

/// Message of the condition with the given type, `None` when absent
pub fn condition_message<T: Object>(
    condition_type: &str,
    obj: &T,
    scheme: &Scheme,
) -> Result<Option<String>> {
    Ok(get_conditions(obj, scheme)?
        .into_iter()
        .find(|c| c.type_ == condition_type)
        .map(|c| c.message))
}

/// Set the message of a condition, appending a new `True` condition when the
/// type is not present yet
pub fn set_condition_message<T: Object>(
    condition_type: &str,
    message: &str,
    reason: &str,
    obj: &mut T,
    scheme: &Scheme,
) -> Result<()> {
    let mut conditions = get_conditions(obj, scheme)?;
    match conditions.iter_mut().find(|c| c.type_ == condition_type) {
        Some(existing) => {
            existing.message = message.to_string();
        }
        None => {
            let mut condition = Condition::new(condition_type, "True");
            condition.reason = reason.to_string();
            condition.message = message.to_string();
            condition.last_transition_time = Some(chrono::Utc::now());
            conditions.push(condition);
        }
    }
    scheme.set_conditions(obj, conditions);
    Ok(())
}

/// Remove every condition with the given type
pub fn delete_condition<T: Object>(condition_type: &str, obj: &mut T, scheme: &Scheme) -> Result<()> {
    let mut conditions = get_conditions(obj, scheme)?;
    conditions.retain(|c| c.type_ != condition_type);
    scheme.set_conditions(obj, conditions);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{self, ConfigMap, Pod};

    fn scheme() -> Scheme {
        let mut scheme = Scheme::new();
        api::add_to_scheme(&mut scheme);
        scheme
    }

    fn scheduled_pod() -> Pod {
        let mut pod = Pod::new("default", "test-pod");
        let mut condition = Condition::new("PodScheduled", "True");
        condition.reason = "PodScheduled".to_string();
        condition.message = "Pod has been scheduled".to_string();
        pod.status.conditions.push(condition);
        pod
    }

    #[test]
    fn test_get_conditions() {
        let scheme = scheme();
        let mut pod = Pod::new("default", "test-pod");
        pod.status.conditions.push(Condition::new("PodScheduled", "True"));

        let conditions = get_conditions(&pod, &scheme).unwrap();
        assert_eq!(conditions, vec![Condition::new("PodScheduled", "True")]);
    }

    #[test]
    fn test_get_condition_message() {
        let scheme = scheme();
        let pod = scheduled_pod();

        assert_eq!(
            condition_message("PodScheduled", &pod, &scheme).unwrap(),
            Some("Pod has been scheduled".to_string())
        );
        assert_eq!(condition_message("Missing", &pod, &scheme).unwrap(), None);
    }

    #[test]
    fn test_set_condition_message() {
        let scheme = scheme();
        let mut pod = scheduled_pod();

        set_condition_message("PodScheduled", "New message", "Test", &mut pod, &scheme).unwrap();
        assert_eq!(
            condition_message("PodScheduled", &pod, &scheme).unwrap().as_deref(),
            Some("New message")
        );

        set_condition_message("NewCondition", "Initial message", "Test", &mut pod, &scheme)
            .unwrap();
        assert_eq!(
            condition_message("NewCondition", &pod, &scheme).unwrap().as_deref(),
            Some("Initial message")
        );
        assert_eq!(pod.status.conditions.len(), 2);
    }

    #[test]
    fn test_delete_condition() {
        let scheme = scheme();
        let mut pod = scheduled_pod();

        delete_condition("PodScheduled", &mut pod, &scheme).unwrap();
        assert!(get_conditions(&pod, &scheme).unwrap().is_empty());
    }

    #[test]
    fn test_kind_without_conditions() {
        let scheme = scheme();
        let cm = ConfigMap::new("default", "cm");
        let err = get_conditions(&cm, &scheme).unwrap_err();
        assert_eq!(err, KubetracerError::conditions_unsupported("ConfigMap"));
    }
}
