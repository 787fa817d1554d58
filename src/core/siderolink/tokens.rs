// src/core/siderolink/tokens.rs

//! Join-token lifecycle: minting helpers and the status controller.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DEFAULT_JOIN_TOKEN_ID, generate_token, token_fingerprint};
use crate::core::Error;
use crate::core::resource::kinds::{JoinTokenSpec, JoinTokenState, JoinTokenStatusSpec};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use crate::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use crate::core::store::ListOptions;

pub const NAME: &str = "JoinTokenStatusController";

/// Builds a fresh JoinToken resource; the id is the token fingerprint, so
/// the secret never appears in resource keys or logs.
pub fn new_join_token(
    name: &str,
    expiration_time: Option<DateTime<Utc>>,
) -> Result<Resource, Error> {
    let token = generate_token()?;
    let id = token_fingerprint(&token);
    Ok(Resource::new(
        id,
        ResourceSpec::JoinToken(JoinTokenSpec {
            name: name.to_string(),
            token,
            expiration_time,
            revoked: false,
        }),
    ))
}

/// Derives JoinTokenStatus from the token inventory, per-link usages, and
/// the default-token pointer. Expiry is driven by requeueing at the nearest
/// future expiration.
pub struct JoinTokenStatusController;

#[async_trait]
impl Controller for JoinTokenStatusController {
    fn definition(&self) -> ControllerDefinition {
        ControllerDefinition {
            name: NAME.to_string(),
            inputs: vec![
                InputSpec::strong(Kind::JoinToken),
                InputSpec::weak(Kind::JoinTokenUsage),
                InputSpec::weak(Kind::DefaultJoinToken),
            ],
            outputs: vec![Kind::JoinTokenStatus],
        }
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        let tokens = ctx.list(Namespace::Default, Kind::JoinToken, &ListOptions::default())?;

        let mut use_counts: HashMap<String, u64> = HashMap::new();
        for usage in ctx.list(
            Namespace::Default,
            Kind::JoinTokenUsage,
            &ListOptions::default(),
        )? {
            if let Some(spec) = usage.spec.as_join_token_usage() {
                *use_counts.entry(spec.token_id.clone()).or_default() += 1;
            }
        }

        let default_token_id = ctx
            .get_optional(&ResourceKey::in_default(
                Kind::DefaultJoinToken,
                DEFAULT_JOIN_TOKEN_ID,
            ))?
            .and_then(|res| res.spec.as_default_join_token().map(|s| s.token_id.clone()));

        // Statuses for tokens that no longer exist are reaped.
        for status in ctx.list(
            Namespace::Default,
            Kind::JoinTokenStatus,
            &ListOptions::default(),
        )? {
            if !tokens.iter().any(|t| t.id() == status.id()) {
                ctx.teardown_and_destroy(&status.key())?;
            }
        }

        let now = Utc::now();
        let mut next_expiry: Option<DateTime<Utc>> = None;

        for token in &tokens {
            ctx.check_cancelled()?;
            let Some(spec) = token.spec.as_join_token() else {
                continue;
            };

            if token.metadata.is_tearing_down() {
                let status_key = ResourceKey::in_default(Kind::JoinTokenStatus, token.id());
                if ctx.teardown_and_destroy(&status_key)? {
                    ctx.remove_finalizer(&token.key())?;
                }
                continue;
            }
            ctx.add_finalizer(&token.key())?;

            let state = derive_state(spec, now);
            if state == JoinTokenState::Active {
                if let Some(expiry) = spec.expiration_time {
                    next_expiry = Some(next_expiry.map_or(expiry, |e| e.min(expiry)));
                }
            }

            ctx.ensure(Resource::new(
                token.id(),
                ResourceSpec::JoinTokenStatus(JoinTokenStatusSpec {
                    state,
                    use_count: use_counts.get(token.id()).copied().unwrap_or(0),
                    is_default: default_token_id.as_deref() == Some(token.id()),
                    name: spec.name.clone(),
                    expiration_time: spec.expiration_time,
                }),
            ))?;
        }

        match next_expiry {
            Some(expiry) => {
                let delay = (expiry - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .max(Duration::from_secs(1));
                Ok(ReconcileOutcome::Requeue(delay))
            }
            None => Ok(ReconcileOutcome::Ok),
        }
    }
}

fn derive_state(spec: &JoinTokenSpec, now: DateTime<Utc>) -> JoinTokenState {
    if spec.revoked {
        return JoinTokenState::Revoked;
    }
    match spec.expiration_time {
        Some(expiry) if expiry <= now => JoinTokenState::Expired,
        _ => JoinTokenState::Active,
    }
}
