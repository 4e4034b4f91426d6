//! Recovery handler registry and candidate resolution
//!
//! Recovery handlers are registered explicitly, in order, as
//! [`RecoveryDescriptor`]s. When an execution is exhausted the
//! [`RecoveryRegistry`] picks the first descriptor whose label, result type
//! and parameter shape fit the failed operation's [`OperationSignature`].

use futures::future::{self, BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::types::{FailureType, TypeTag};

/// Future returned by a recovery handler
pub type RecoveryFuture<T, E> = BoxFuture<'static, Result<T, E>>;

type Handler<A, T, E> = Arc<dyn Fn(&E, &A) -> RecoveryFuture<T, E> + Send + Sync>;

/// Declared subtype relations between [`TypeTag`]s
///
/// Used for result-type and parameter compatibility. Failure lineages come
/// from [`FailureType::lineage`] and are combined with these declarations.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    parents: HashMap<TypeTag, Vec<TypeTag>>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `child` is-a `parent`
    pub fn declare(mut self, child: impl Into<TypeTag>, parent: impl Into<TypeTag>) -> Self {
        self.parents
            .entry(child.into())
            .or_default()
            .push(parent.into());
        self
    }

    /// Whether a value of type `from` may be used where `to` is expected
    pub fn is_assignable(&self, from: &TypeTag, to: &TypeTag) -> bool {
        let mut pending = vec![from];
        let mut seen = HashSet::new();

        while let Some(current) = pending.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(current) {
                pending.extend(parents.iter());
            }
        }
        false
    }
}

/// Shape of the operation being retried, as seen by recovery resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSignature {
    label: Option<String>,
    result_type: TypeTag,
    parameter_types: Vec<TypeTag>,
}

impl OperationSignature {
    pub fn new(result_type: impl Into<TypeTag>) -> Self {
        Self {
            label: None,
            result_type: result_type.into(),
            parameter_types: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Declare the operation's argument types, in order
    pub fn with_parameters<I, P>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<TypeTag>,
    {
        self.parameter_types = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn result_type(&self) -> &TypeTag {
        &self.result_type
    }

    pub fn parameter_types(&self) -> &[TypeTag] {
        &self.parameter_types
    }
}

/// A recovery handler and the shape it accepts
///
/// The handler receives the last failure and the original operation
/// arguments `A`. `parameter_types` describes which leading arguments it
/// consumes; it may declare fewer than the operation has.
pub struct RecoveryDescriptor<A, T, E> {
    label: Option<String>,
    accepted_failure: TypeTag,
    result_type: TypeTag,
    parameter_types: Vec<TypeTag>,
    handler: Handler<A, T, E>,
}

impl<A, T, E> Clone for RecoveryDescriptor<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            accepted_failure: self.accepted_failure.clone(),
            result_type: self.result_type.clone(),
            parameter_types: self.parameter_types.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<A, T, E> fmt::Debug for RecoveryDescriptor<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryDescriptor")
            .field("label", &self.label)
            .field("accepted_failure", &self.accepted_failure)
            .field("result_type", &self.result_type)
            .field("parameter_types", &self.parameter_types)
            .finish_non_exhaustive()
    }
}

impl<A, T, E> RecoveryDescriptor<A, T, E> {
    /// Create a descriptor around an asynchronous handler
    pub fn new<F>(
        accepted_failure: impl Into<TypeTag>,
        result_type: impl Into<TypeTag>,
        handler: F,
    ) -> Self
    where
        F: Fn(&E, &A) -> RecoveryFuture<T, E> + Send + Sync + 'static,
    {
        Self {
            label: None,
            accepted_failure: accepted_failure.into(),
            result_type: result_type.into(),
            parameter_types: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// Create a descriptor around a synchronous handler
    pub fn from_fn<F>(
        accepted_failure: impl Into<TypeTag>,
        result_type: impl Into<TypeTag>,
        handler: F,
    ) -> Self
    where
        F: Fn(&E, &A) -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        Self::new(accepted_failure, result_type, move |failure: &E, args: &A| {
            future::ready(handler(failure, args)).boxed()
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Declare the argument types the handler takes after the failure
    pub fn with_parameters<I, P>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<TypeTag>,
    {
        self.parameter_types = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn accepted_failure(&self) -> &TypeTag {
        &self.accepted_failure
    }

    pub fn result_type(&self) -> &TypeTag {
        &self.result_type
    }

    pub fn parameter_types(&self) -> &[TypeTag] {
        &self.parameter_types
    }

    /// Run the handler
    pub fn invoke(&self, failure: &E, args: &A) -> RecoveryFuture<T, E> {
        (self.handler)(failure, args)
    }
}

/// Ordered set of recovery handlers for one scope
///
/// Resolution is deterministic: the first matching descriptor in
/// registration order wins.
pub struct RecoveryRegistry<A, T, E> {
    descriptors: Vec<RecoveryDescriptor<A, T, E>>,
    hierarchy: TypeHierarchy,
}

impl<A, T, E> Default for RecoveryRegistry<A, T, E> {
    fn default() -> Self {
        Self {
            descriptors: Vec::new(),
            hierarchy: TypeHierarchy::default(),
        }
    }
}

impl<A, T, E> fmt::Debug for RecoveryRegistry<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryRegistry")
            .field("descriptors", &self.descriptors)
            .field("hierarchy", &self.hierarchy)
            .finish()
    }
}

impl<A, T, E> RecoveryRegistry<A, T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hierarchy(mut self, hierarchy: TypeHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Append a descriptor, keeping registration order
    pub fn register(mut self, descriptor: RecoveryDescriptor<A, T, E>) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn push(&mut self, descriptor: RecoveryDescriptor<A, T, E>) {
        self.descriptors.push(descriptor);
    }

    pub fn descriptors(&self) -> &[RecoveryDescriptor<A, T, E>] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn label_matches(
        descriptor: &RecoveryDescriptor<A, T, E>,
        signature: &OperationSignature,
    ) -> bool {
        descriptor.label() == signature.label()
    }

    fn result_matches(
        &self,
        descriptor: &RecoveryDescriptor<A, T, E>,
        signature: &OperationSignature,
    ) -> bool {
        self.hierarchy
            .is_assignable(descriptor.result_type(), signature.result_type())
    }

    fn parameters_match(
        &self,
        descriptor: &RecoveryDescriptor<A, T, E>,
        signature: &OperationSignature,
        failure_lineage: &[TypeTag],
    ) -> bool {
        let accepts_failure = failure_lineage
            .iter()
            .any(|tag| self.hierarchy.is_assignable(tag, descriptor.accepted_failure()));
        if !accepts_failure {
            return false;
        }

        let wanted = descriptor.parameter_types();
        let available = signature.parameter_types();
        wanted.len() <= available.len()
            && wanted
                .iter()
                .zip(available)
                .all(|(expected, actual)| self.hierarchy.is_assignable(actual, expected))
    }
}

impl<A, T, E: FailureType> RecoveryRegistry<A, T, E> {
    /// Select the recovery handler for a failed operation, if any
    pub fn resolve(
        &self,
        signature: &OperationSignature,
        failure: &E,
    ) -> Option<&RecoveryDescriptor<A, T, E>> {
        let lineage = failure.lineage();

        let selected = self.descriptors.iter().find(|descriptor| {
            Self::label_matches(descriptor, signature)
                && self.result_matches(descriptor, signature)
                && self.parameters_match(descriptor, signature, &lineage)
        });

        match selected {
            Some(descriptor) => tracing::debug!(
                label = ?signature.label(),
                accepted_failure = %descriptor.accepted_failure(),
                "recovery handler selected"
            ),
            None => tracing::debug!(
                label = ?signature.label(),
                candidates = self.descriptors.len(),
                "no recovery handler matches"
            ),
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum OrderError {
        Network,
        Timeout,
        Validation,
    }

    impl FailureType for OrderError {
        fn type_tag(&self) -> TypeTag {
            match self {
                OrderError::Network => TypeTag::from_static("NetworkError"),
                OrderError::Timeout => TypeTag::from_static("TimeoutError"),
                OrderError::Validation => TypeTag::from_static("ValidationError"),
            }
        }

        fn lineage(&self) -> Vec<TypeTag> {
            vec![self.type_tag(), TypeTag::from_static("OrderError")]
        }
    }

    type Args = (String, u32);

    fn descriptor(
        accepted: &'static str,
        tag: &'static str,
    ) -> RecoveryDescriptor<Args, String, OrderError> {
        RecoveryDescriptor::from_fn(accepted, "String", move |_: &OrderError, _: &Args| {
            Ok(tag.to_string())
        })
    }

    fn signature() -> OperationSignature {
        OperationSignature::new("String").with_parameters(["String", "u32"])
    }

    async fn run(descriptor: &RecoveryDescriptor<Args, String, OrderError>) -> String {
        descriptor
            .invoke(&OrderError::Network, &("order-1".to_string(), 3))
            .await
            .unwrap()
    }

    #[test]
    fn test_hierarchy_assignability() {
        let hierarchy = TypeHierarchy::new()
            .declare("TimeoutError", "NetworkError")
            .declare("NetworkError", "Error");

        let timeout = TypeTag::from_static("TimeoutError");
        let error = TypeTag::from_static("Error");
        assert!(hierarchy.is_assignable(&timeout, &timeout));
        assert!(hierarchy.is_assignable(&timeout, &error));
        assert!(!hierarchy.is_assignable(&error, &timeout));
    }

    #[test]
    fn test_hierarchy_tolerates_cycles() {
        let hierarchy = TypeHierarchy::new().declare("A", "B").declare("B", "A");
        assert!(!hierarchy.is_assignable(&TypeTag::from_static("A"), &TypeTag::from_static("C")));
    }

    #[tokio::test]
    async fn test_first_match_in_registration_order_wins() {
        let registry = RecoveryRegistry::new()
            .register(descriptor("NetworkError", "first"))
            .register(descriptor("NetworkError", "second"));

        let selected = registry.resolve(&signature(), &OrderError::Network).unwrap();
        assert_eq!(run(selected).await, "first");
    }

    #[tokio::test]
    async fn test_label_must_match_exactly() {
        let registry = RecoveryRegistry::new()
            .register(descriptor("OrderError", "labeled").with_label("checkout"))
            .register(descriptor("OrderError", "unlabeled"));

        let unlabeled = registry.resolve(&signature(), &OrderError::Network).unwrap();
        assert_eq!(run(unlabeled).await, "unlabeled");

        let labeled = registry
            .resolve(&signature().with_label("checkout"), &OrderError::Network)
            .unwrap();
        assert_eq!(run(labeled).await, "labeled");

        assert!(registry
            .resolve(&signature().with_label("refund"), &OrderError::Network)
            .is_none());
    }

    #[test]
    fn test_failure_must_be_accepted() {
        let registry = RecoveryRegistry::new().register(descriptor("NetworkError", "net"));

        assert!(registry.resolve(&signature(), &OrderError::Network).is_some());
        assert!(registry.resolve(&signature(), &OrderError::Validation).is_none());
    }

    #[test]
    fn test_failure_accepted_through_declared_hierarchy() {
        let registry = RecoveryRegistry::new()
            .with_hierarchy(TypeHierarchy::new().declare("TimeoutError", "NetworkError"))
            .register(descriptor("NetworkError", "net"));

        assert!(registry.resolve(&signature(), &OrderError::Timeout).is_some());
    }

    #[test]
    fn test_result_type_must_be_assignable() {
        let registry: RecoveryRegistry<Args, String, OrderError> = RecoveryRegistry::new()
            .with_hierarchy(TypeHierarchy::new().declare("Receipt", "Document"))
            .register(RecoveryDescriptor::from_fn("OrderError", "Receipt", |_, _| {
                Ok("receipt".to_string())
            }));

        let wants_document = OperationSignature::new("Document");
        let wants_invoice = OperationSignature::new("Invoice");

        assert!(registry.resolve(&wants_document, &OrderError::Network).is_some());
        assert!(registry.resolve(&wants_invoice, &OrderError::Network).is_none());
    }

    #[test]
    fn test_parameter_shape() {
        let registry = RecoveryRegistry::new()
            .register(
                descriptor("OrderError", "too-many").with_parameters(["String", "u32", "bool"]),
            )
            .register(descriptor("OrderError", "wrong-order").with_parameters(["u32"]))
            .register(descriptor("OrderError", "prefix").with_parameters(["String"]));

        let selected = registry.resolve(&signature(), &OrderError::Network).unwrap();
        assert_eq!(selected.parameter_types(), &[TypeTag::from_static("String")]);
    }

    #[tokio::test]
    async fn test_handler_receives_failure_and_arguments() {
        let descriptor: RecoveryDescriptor<Args, String, OrderError> =
            RecoveryDescriptor::from_fn("OrderError", "String", |failure, (id, qty)| {
                Ok(format!("{:?}:{}:{}", failure, id, qty))
            });

        let result = descriptor
            .invoke(&OrderError::Timeout, &("order-9".to_string(), 2))
            .await
            .unwrap();
        assert_eq!(result, "Timeout:order-9:2");
    }

    #[test]
    fn test_empty_registry_resolves_nothing() {
        let registry: RecoveryRegistry<Args, String, OrderError> = RecoveryRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve(&signature(), &OrderError::Network).is_none());
    }
}
