//! Watch events delivered to predicates and event handlers.
//!
//! Either side of an update may be missing when the watch source could not
//! supply it.

#[derive(Debug, Clone, PartialEq)]
pub struct CreateEvent<T> {
    pub object: Option<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent<T> {
    pub object_old: Option<T>,
    pub object_new: Option<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteEvent<T> {
    pub object: Option<T>,
    pub delete_state_unknown: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericEvent<T> {
    pub object: Option<T>,
}

impl<T> CreateEvent<T> {
    pub fn new(object: T) -> Self {
        Self {
            object: Some(object),
        }
    }
}

impl<T> UpdateEvent<T> {
    pub fn new(object_old: T, object_new: T) -> Self {
        Self {
            object_old: Some(object_old),
            object_new: Some(object_new),
        }
    }
}

impl<T> DeleteEvent<T> {
    pub fn new(object: T) -> Self {
        Self {
            object: Some(object),
            delete_state_unknown: false,
        }
    }
}

impl<T> GenericEvent<T> {
    pub fn new(object: T) -> Self {
        Self {
            object: Some(object),
        }
    }
}
