use std::sync::Arc;

use mentorline_push::PushTransport;
use tokio::sync::Mutex;
use mentorline_store::{AccountDirectory, BreachLedgerStore, ConversationReader, MentorshipStore};

use crate::{
    AccountAdministration, AnnouncementFanout, BreachLedgerWriter, MutePolicyResolver,
    NotificationDispatcher, RealtimeTriggerHandler, ReplyDetector, SlaConfig, SlaResult, SlaSweep,
};

/// Process-wide collaborators, built once at startup and handed to each
/// entry point.
///
/// Capabilities are kept separate so the realtime handler only ever receives
/// the read side of the store.
#[derive(Clone)]
pub struct AppContext {
    reader: Arc<dyn ConversationReader>,
    ledger: Arc<dyn BreachLedgerStore>,
    accounts: Arc<dyn AccountDirectory>,
    dispatcher: NotificationDispatcher,
    config: SlaConfig,
    sweep_gate: Arc<Mutex<()>>,
}

impl AppContext {
    pub fn new<S>(
        store: Arc<S>,
        transport: Arc<dyn PushTransport>,
        config: SlaConfig,
    ) -> SlaResult<Self>
    where
        S: MentorshipStore + 'static,
    {
        let reader: Arc<dyn ConversationReader> = store.clone();
        let ledger: Arc<dyn BreachLedgerStore> = store.clone();
        let accounts: Arc<dyn AccountDirectory> = store;
        Self::from_parts(reader, ledger, accounts, transport, config)
    }

    pub fn from_parts(
        reader: Arc<dyn ConversationReader>,
        ledger: Arc<dyn BreachLedgerStore>,
        accounts: Arc<dyn AccountDirectory>,
        transport: Arc<dyn PushTransport>,
        config: SlaConfig,
    ) -> SlaResult<Self> {
        config.validate()?;
        Ok(Self {
            reader,
            ledger,
            accounts,
            dispatcher: NotificationDispatcher::new(transport),
            config,
            sweep_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn config(&self) -> &SlaConfig {
        &self.config
    }

    pub fn ledger(&self) -> Arc<dyn BreachLedgerStore> {
        self.ledger.clone()
    }

    pub fn sweep(&self) -> SlaSweep {
        SlaSweep::new(
            self.reader.clone(),
            ReplyDetector::new(self.reader.clone()),
            MutePolicyResolver::new(self.reader.clone()),
            self.dispatcher.clone(),
            BreachLedgerWriter::new(self.ledger.clone()),
            self.config.clone(),
            self.sweep_gate.clone(),
        )
    }

    pub fn realtime(&self) -> RealtimeTriggerHandler {
        RealtimeTriggerHandler::new(
            self.reader.clone(),
            self.dispatcher.clone(),
            self.config.window,
        )
    }

    pub fn announcements(&self) -> AnnouncementFanout {
        AnnouncementFanout::new(self.reader.clone(), self.dispatcher.clone())
    }

    pub fn admin(&self) -> AccountAdministration {
        AccountAdministration::new(self.accounts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::AppContext;
    use crate::SlaConfig;
    use mentorline_push::RecordingPushTransport;
    use mentorline_store::InMemoryMentorshipStore;
    use std::sync::Arc;

    #[test]
    fn rejects_invalid_config() {
        let result = AppContext::new(
            Arc::new(InMemoryMentorshipStore::new()),
            Arc::new(RecordingPushTransport::new()),
            SlaConfig {
                sweep_concurrency: 0,
                ..SlaConfig::default()
            },
        );
        assert!(result.is_err());
    }
}
