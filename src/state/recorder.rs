//! API-response recorders: the designated writers of protected fields

use super::schema::{ActionRecord, AuthState, Dashboard};
use super::{StateManager, StateResult};
use crate::ports::MemberSession;

impl StateManager {
    /// Store the dashboard and credentials from a login or onboarding response
    pub async fn record_login(&self, session: &MemberSession) -> StateResult<()> {
        self.modify(|state| {
            state.dashboard = Some(session.dashboard.clone());
            state.auth = Some(session.auth.clone());
            Ok(())
        })
        .await?;

        tracing::info!(
            channel = %self.identity(),
            member_id = %session.auth.member_id,
            "Member session recorded"
        );
        Ok(())
    }

    /// Store the outcome of a business action, refreshing the dashboard when
    /// the response carried one
    pub async fn record_action(
        &self,
        action: ActionRecord,
        dashboard: Option<Dashboard>,
    ) -> StateResult<()> {
        let action_type = action.action_type;
        self.modify(|state| {
            state.action = Some(action.clone());
            if let Some(dashboard) = &dashboard {
                state.dashboard = Some(dashboard.clone());
            }
            Ok(())
        })
        .await?;

        tracing::info!(channel = %self.identity(), ?action_type, "Action recorded");
        Ok(())
    }

    pub async fn dashboard(&self) -> StateResult<Option<Dashboard>> {
        Ok(self.load().await?.and_then(|s| s.dashboard))
    }

    pub async fn auth(&self) -> StateResult<Option<AuthState>> {
        Ok(self.load().await?.and_then(|s| s.auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ActionType, ChannelIdentity};
    use crate::store::{AtomicStore, MemoryStore};
    use crate::testing::{sample_dashboard, sample_session};
    use chrono::Utc;
    use serde_json::{json, Map};
    use std::sync::Arc;
    use std::time::Duration;

    fn manager() -> StateManager {
        StateManager::new(
            AtomicStore::new(Arc::new(MemoryStore::new()), 3),
            ChannelIdentity::whatsapp("263770000002"),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_record_login_sets_dashboard_and_auth() {
        let state = manager();
        state.initialize_channel(false).await.unwrap();

        state.record_login(&sample_session()).await.unwrap();

        let auth = state.auth().await.unwrap().unwrap();
        assert_eq!(auth.member_id, "member-1");
        assert_eq!(
            state.dashboard().await.unwrap().unwrap().account.account_handle,
            "alice"
        );
    }

    #[tokio::test]
    async fn test_record_action_keeps_dashboard_when_absent_from_response() {
        let state = manager();
        state.initialize_channel(false).await.unwrap();
        state.record_login(&sample_session()).await.unwrap();

        let action = ActionRecord {
            id: "offer-9".into(),
            action_type: ActionType::OfferCreated,
            timestamp: Utc::now(),
            actor: "member-1".into(),
            details: Map::new(),
        };
        state.record_action(action, None).await.unwrap();

        let loaded = state.load().await.unwrap().unwrap();
        assert_eq!(loaded.action.unwrap().id, "offer-9");
        assert_eq!(loaded.dashboard, Some(sample_dashboard()));
    }

    #[tokio::test]
    async fn test_recorded_fields_stay_protected() {
        let state = manager();
        state.initialize_channel(false).await.unwrap();
        state.record_login(&sample_session()).await.unwrap();

        let mut updates = Map::new();
        updates.insert("auth".into(), json!({"token": "forged", "member_id": "x"}));
        assert!(state.update_state(updates).await.is_err());
        assert_eq!(state.auth().await.unwrap().unwrap().token, "token-1");
    }
}
