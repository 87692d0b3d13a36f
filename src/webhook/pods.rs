//! Pod mutation admission handler

use std::sync::Arc;

use axum::{extract::State, Json};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use tracing::{debug, error, info, warn};

use crate::constants::DEFAULT_NAMESPACE;
use crate::observability::metrics;

use super::{secrets_mutator, WebhookState};

/// Handle a mutating admission review for pods
pub async fn mutate_pods_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            metrics::increment_admission_requests("invalid");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = admit(&state, &req).await;
    Json(response.into_review())
}

/// Admission decision for a single request, never fails
pub async fn admit(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let uid = request.uid.as_str();

    let Some(object) = &request.object else {
        debug!(uid, "No object in request, allowing unchanged");
        metrics::increment_admission_requests("allowed");
        return AdmissionResponse::from(request);
    };

    if request.kind.kind != "Pod" {
        debug!(uid, kind = %request.kind.kind, "Not a pod, allowing unchanged");
        metrics::increment_admission_requests("allowed");
        return AdmissionResponse::from(request);
    }

    let pod: Pod = match object.clone().try_parse() {
        Ok(pod) => pod,
        Err(e) => {
            warn!(uid, error = %e, "Failed to decode pod from admission request");
            metrics::increment_admission_requests("invalid");
            return AdmissionResponse::invalid(format!("failed to decode pod: {e}"));
        }
    };

    let namespace = request
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .or_else(|| pod.metadata.namespace.clone().filter(|ns| !ns.is_empty()))
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let pod_name = pod
        .metadata
        .name
        .clone()
        .or_else(|| pod.metadata.generate_name.clone())
        .unwrap_or_default();

    let mutation = match secrets_mutator(state, &pod, &namespace).await {
        Ok(mutation) => mutation,
        Err(e) => {
            warn!(
                uid,
                namespace = %namespace,
                pod = %pod_name,
                stop = e.stops_chain(),
                error = %e,
                "Denying pod"
            );
            metrics::increment_mutation_errors(e.kind());
            metrics::increment_admission_requests("denied");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    if !mutation.mutated {
        debug!(uid, namespace = %namespace, pod = %pod_name, "Pod not mutated, allowing unchanged");
        metrics::increment_admission_requests("allowed");
        return AdmissionResponse::from(request);
    }

    let patch = match (serde_json::to_value(&pod), serde_json::to_value(&mutation.pod)) {
        (Ok(original), Ok(mutated)) => json_patch::diff(&original, &mutated),
        (Err(e), _) | (_, Err(e)) => {
            error!(uid, error = %e, "Failed to serialize pod");
            metrics::increment_admission_requests("denied");
            return AdmissionResponse::from(request).deny(format!("pod serialization error: {e}"));
        }
    };

    info!(
        uid,
        namespace = %namespace,
        pod = %pod_name,
        containers = mutation.containers_mutated,
        secret_references = mutation.secret_references,
        patch_ops = patch.0.len(),
        dry_run = request.dry_run,
        "✅ Pod mutated"
    );

    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => {
            metrics::increment_admission_requests("patched");
            response
        }
        Err(e) => {
            error!(uid, error = %e, "Failed to serialize patch");
            metrics::increment_admission_requests("denied");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}
