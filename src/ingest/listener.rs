use super::supervisor::ConnectionSupervisor;
use crate::bus::{presence_channel, status_channel, BusMessage, BusSession, ChannelKind};
use crate::config::schema::UserConfig;
use crate::error::{BusError, DecodeError};
use crate::event::LightEvent;
use crate::status::{
    DedupCache, Presence, Status, StatusAggregator, StatusEvent, UserGroupSet,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Why the listen loop returned.
#[derive(Debug, PartialEq, Eq)]
enum ListenOutcome {
    Stopped,
    Reconnect,
}

/// Subscribes to status and presence channels and turns messages into events.
pub struct ChannelListener {
    status_groups: Vec<String>,
    known_users: Vec<String>,
    dedup: DedupCache,
    aggregator: StatusAggregator,
    presence: HashMap<String, Presence>,
    events: broadcast::Sender<LightEvent>,
    poll_timeout: Duration,
}

impl ChannelListener {
    pub fn new(
        user: &UserConfig,
        poll_timeout: Duration,
        events: broadcast::Sender<LightEvent>,
    ) -> Self {
        Self {
            status_groups: user.status_groups(),
            known_users: user.known_users.clone(),
            dedup: DedupCache::default(),
            aggregator: StatusAggregator::new(UserGroupSet::new(
                user.groups.iter().cloned(),
                &user.username,
            )),
            presence: HashMap::new(),
            events,
            poll_timeout,
        }
    }

    /// Every channel subscribed on connect.
    pub fn channels(&self) -> Vec<String> {
        self.status_groups
            .iter()
            .map(|g| status_channel(g))
            .chain(self.known_users.iter().map(|u| presence_channel(u)))
            .collect()
    }

    pub fn group_status(&self, group: &str) -> Option<Status> {
        self.aggregator.table().get(group)
    }

    pub fn overall(&self) -> Status {
        self.aggregator.overall()
    }

    pub fn presence(&self, username: &str) -> Option<Presence> {
        self.presence.get(username).copied()
    }

    /// Connect, subscribe, catch up and listen until cancelled, reconnecting
    /// with backoff whenever the link fails.
    pub async fn run(mut self, mut supervisor: ConnectionSupervisor) -> crate::error::Result<()> {
        let cancel = supervisor.cancel_token().clone();

        while !cancel.is_cancelled() {
            let Some(mut session) = supervisor.connect().await else {
                if !supervisor.wait_before_retry().await {
                    break;
                }
                continue;
            };

            if let Err(e) = self.establish(session.as_mut()).await {
                warn!("failed to set up subscriptions: {e}");
                supervisor.connection_lost();
                if !supervisor.wait_before_retry().await {
                    break;
                }
                continue;
            }
            supervisor.mark_established();

            match self.listen(session.as_mut(), &mut supervisor).await {
                ListenOutcome::Stopped => break,
                ListenOutcome::Reconnect => {
                    supervisor.connection_lost();
                    if !supervisor.wait_before_retry().await {
                        break;
                    }
                }
            }
        }

        info!("bus listener stopped");
        Ok(())
    }

    /// Subscribe to every channel, then replay the newest log entry of each
    /// status channel.
    async fn establish(&mut self, session: &mut dyn BusSession) -> Result<(), BusError> {
        let channels = self.channels();
        session.subscribe(&channels).await?;
        info!("subscribed to {} channels", channels.len());
        self.catch_up(session).await
    }

    async fn catch_up(&mut self, session: &mut dyn BusSession) -> Result<(), BusError> {
        for group in self.status_groups.clone() {
            let channel = status_channel(&group);
            let event = match session.last_entry(&channel).await? {
                Some(raw) => match StatusEvent::decode(&raw) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("unreadable history on {channel}: {e}");
                        if self.aggregator.table().contains(&group) {
                            continue;
                        }
                        StatusEvent::synthesized(&group)
                    }
                },
                None => {
                    debug!("no history on {channel}, assuming normal");
                    StatusEvent::synthesized(&group)
                }
            };
            self.ingest(&group, event);
        }
        Ok(())
    }

    async fn listen(
        &mut self,
        session: &mut dyn BusSession,
        supervisor: &mut ConnectionSupervisor,
    ) -> ListenOutcome {
        let cancel = supervisor.cancel_token().clone();
        debug!("listening for messages");

        loop {
            if cancel.is_cancelled() {
                return ListenOutcome::Stopped;
            }

            if supervisor.health_check_due() && !supervisor.health_check(session).await {
                return ListenOutcome::Reconnect;
            }

            let received = tokio::select! {
                () = cancel.cancelled() => return ListenOutcome::Stopped,
                received = session.next_message(self.poll_timeout) => received,
            };

            let failed = match received {
                Ok(None) => continue,
                Ok(Some(msg)) => match self.handle_message(&msg) {
                    Ok(()) => false,
                    Err(e) => {
                        warn!("dropping message on {}: {e}", msg.channel);
                        true
                    }
                },
                Err(BusError::Closed) => {
                    warn!("bus connection closed");
                    return ListenOutcome::Reconnect;
                }
                Err(e) => {
                    warn!("error receiving from bus: {e}");
                    true
                }
            };

            if !failed {
                supervisor.record_success();
            } else if supervisor.record_error() {
                return ListenOutcome::Reconnect;
            }
        }
    }

    /// Route one live message to the status or presence pipeline.
    ///
    /// # Errors
    /// Returns `DecodeError` for a malformed payload; the message is dropped.
    pub fn handle_message(&mut self, msg: &BusMessage) -> Result<(), DecodeError> {
        match ChannelKind::classify(&msg.channel) {
            Some(ChannelKind::Status(group)) => {
                let event = StatusEvent::decode(&msg.payload)?;
                self.ingest(&group, event);
            }
            Some(ChannelKind::Presence(username)) => {
                let presence = Presence::decode(&msg.payload)?;
                self.update_presence(username, presence);
            }
            None => debug!("ignoring message on {}", msg.channel),
        }
        Ok(())
    }

    /// Dedup, record and publish a status event. Returns `false` for duplicates.
    fn ingest(&mut self, group: &str, mut event: StatusEvent) -> bool {
        if event.group.is_empty() {
            event.group = group.to_string();
        }

        let hash = event.hash();
        if !self.dedup.admit(hash) {
            debug!("duplicate event {hash} for {group}, skipping");
            return false;
        }

        info!("group {group}: {}", event.status);
        let status = event.status;
        let event = Arc::new(event);

        if event.has_ticket_info() {
            let _ = self.events.send(LightEvent::TicketReceived {
                ticket: event.ticket.clone(),
                summary: event.summary.clone(),
                popup_url: event.popup_url.clone(),
                group: group.to_string(),
            });
        }

        let _ = self.events.send(LightEvent::GroupChanged {
            group: group.to_string(),
            status,
            event,
        });

        if let Some(overall) = self.aggregator.on_group_update(group, status) {
            info!("overall status: {overall}");
            let _ = self.events.send(LightEvent::OverallStatus(overall));
        }
        true
    }

    fn update_presence(&mut self, username: String, presence: Presence) {
        if self.presence.get(&username) == Some(&presence) {
            return;
        }
        debug!("presence {username}: {presence}");
        self.presence.insert(username.clone(), presence);
        let _ = self.events.send(LightEvent::PresenceChanged { username, presence });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::bus::BusConnector;
    use crate::config::schema::BusConfig;
    use crate::ingest::Phase;
    use tokio_util::sync::CancellationToken;

    fn user() -> UserConfig {
        UserConfig {
            username: "alice".into(),
            groups: vec!["ops".into()],
            all_groups: vec!["ops".into(), "noc".into()],
            known_users: vec!["alice".into(), "bob".into()],
        }
    }

    fn listener() -> (ChannelListener, broadcast::Receiver<LightEvent>) {
        let (tx, rx) = broadcast::channel(256);
        (ChannelListener::new(&user(), Duration::from_millis(100), tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<LightEvent>) -> Vec<LightEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn msg(channel: &str, payload: &str) -> BusMessage {
        BusMessage {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    fn group_changes(events: &[LightEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, LightEvent::GroupChanged { .. }))
            .count()
    }

    const OPS_ALERT: &str =
        r#"{"group":"ops","status":"alert","timestamp":"2024-05-01T10:00:00Z","ticket":"42"}"#;

    #[test]
    fn channel_set_covers_groups_personal_and_presence() {
        let (l, _rx) = listener();
        assert_eq!(
            l.channels(),
            vec![
                "status:ops",
                "status:noc",
                "status:alice",
                "user_status:alice",
                "user_status:bob",
            ]
        );
    }

    #[tokio::test]
    async fn catch_up_synthesizes_normal_for_empty_log() {
        let bus = MemoryBus::new();
        bus.push_log("status:noc", r#"{"group":"noc","status":"warning","timestamp":"t"}"#);
        let (mut l, mut rx) = listener();

        let mut session = bus.connect().await.unwrap();
        l.establish(session.as_mut()).await.unwrap();

        assert_eq!(l.group_status("ops"), Some(Status::Normal));
        assert_eq!(l.group_status("noc"), Some(Status::Warning));
        assert_eq!(l.group_status("alice"), Some(Status::Normal));
        // noc is monitored but not a membership.
        assert_eq!(l.overall(), Status::Normal);

        let events = drain(&mut rx);
        let ops = events.iter().find_map(|e| match e {
            LightEvent::GroupChanged { group, event, .. } if group == "ops" => Some(event.clone()),
            _ => None,
        });
        let ops = ops.unwrap();
        assert_eq!(ops.group, "ops");
        assert_eq!(ops.status, Status::Normal);
        assert_eq!(bus.subscriptions(), l.channels());
    }

    #[tokio::test]
    async fn catch_up_replays_latest_entry_once() {
        let bus = MemoryBus::new();
        bus.push_log("status:ops", r#"{"status":"normal","timestamp":"t0"}"#);
        bus.push_log("status:ops", OPS_ALERT);
        let (mut l, mut rx) = listener();

        let mut session = bus.connect().await.unwrap();
        l.establish(session.as_mut()).await.unwrap();
        assert_eq!(l.group_status("ops"), Some(Status::Alert));
        assert_eq!(l.overall(), Status::Alert);
        drain(&mut rx);

        // A reconnect replays the same entry; it is a duplicate now.
        l.establish(session.as_mut()).await.unwrap();
        let events = drain(&mut rx);
        assert!(!events.iter().any(
            |e| matches!(e, LightEvent::GroupChanged { group, .. } if group == "ops")
        ));
    }

    #[test]
    fn duplicate_events_emit_once() {
        let (mut l, mut rx) = listener();
        l.handle_message(&msg("status:ops", OPS_ALERT)).unwrap();
        l.handle_message(&msg("status:ops", OPS_ALERT)).unwrap();

        let events = drain(&mut rx);
        assert_eq!(group_changes(&events), 1);
        let overall: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                LightEvent::OverallStatus(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(overall, vec![Status::Alert]);
    }

    #[test]
    fn tickets_are_forwarded_regardless_of_aggregation() {
        let (mut l, mut rx) = listener();
        // noc does not count toward alice, but its ticket still goes out.
        l.handle_message(&msg(
            "status:noc",
            r#"{"status":"alert","ticket":7,"summary":"router","popup_url":"https://t/7","timestamp":"t"}"#,
        ))
        .unwrap();

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            LightEvent::TicketReceived { ticket: Some(t), group, .. } if t == "7" && group == "noc"
        )));
        assert!(!events.iter().any(|e| matches!(e, LightEvent::OverallStatus(_))));
        assert_eq!(l.group_status("noc"), Some(Status::Alert));
    }

    #[test]
    fn presence_never_touches_group_table() {
        let (mut l, mut rx) = listener();
        l.handle_message(&msg("status:ops", OPS_ALERT)).unwrap();
        drain(&mut rx);

        l.handle_message(&msg("user_status:alice", r#"{"status":"busy"}"#))
            .unwrap();
        assert_eq!(l.presence("alice"), Some(Presence::Busy));
        assert_eq!(l.group_status("alice"), None);
        assert_eq!(l.group_status("ops"), Some(Status::Alert));
        assert_eq!(l.overall(), Status::Alert);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            LightEvent::PresenceChanged { username, presence: Presence::Busy } if username == "alice"
        ));

        // Same presence again is not re-announced.
        l.handle_message(&msg("user_status:alice", "busy")).unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_crash() {
        let (mut l, mut rx) = listener();
        assert!(l.handle_message(&msg("status:ops", "{oops")).is_err());
        assert!(l.handle_message(&msg("elsewhere", "{oops")).is_ok());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(l.group_status("ops"), None);
    }

    #[test]
    fn unknown_status_counts_as_normal() {
        let (mut l, _rx) = listener();
        l.handle_message(&msg("status:ops", r#"{"status":"purple","timestamp":"t"}"#))
            .unwrap();
        assert_eq!(l.group_status("ops"), Some(Status::Normal));
    }

    fn spawn_run(
        bus: &MemoryBus,
    ) -> (
        tokio::task::JoinHandle<crate::error::Result<()>>,
        CancellationToken,
        broadcast::Receiver<LightEvent>,
    ) {
        let (tx, rx) = broadcast::channel(256);
        let cancel = CancellationToken::new();
        let config: BusConfig = toml::from_str("host = \"bus\"").unwrap();
        let supervisor =
            ConnectionSupervisor::new(Arc::new(bus.clone()), &config, tx.clone(), cancel.clone());
        let l = ChannelListener::new(&user(), Duration::from_millis(100), tx);
        (tokio::spawn(l.run(supervisor)), cancel, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn error_streak_reconnects() {
        let bus = MemoryBus::new();
        for _ in 0..3 {
            bus.publish("status:ops", "{garbage");
        }
        let (task, cancel, _rx) = spawn_run(&bus);

        // Three bad messages, then a 5s backoff before the second session.
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(bus.connects(), 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_health_check_reconnects() {
        let bus = MemoryBus::new();
        bus.break_ping(true);
        let (task, cancel, mut rx) = spawn_run(&bus);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(bus.connects(), 1);

        // Ping at 30s fails, reconnect after the 5s backoff.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(bus.connects(), 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, LightEvent::ConnectionPhase(Phase::Degraded))));
    }

    #[tokio::test(start_paused = true)]
    async fn run_reconnects_and_resubscribes() {
        let bus = MemoryBus::new();
        bus.fail_next_connects(1);
        bus.publish("status:ops", OPS_ALERT);
        bus.drop_when_drained(true);

        let (tx, mut rx) = broadcast::channel(256);
        let cancel = CancellationToken::new();
        let config: BusConfig = toml::from_str("host = \"bus\"").unwrap();
        let supervisor =
            ConnectionSupervisor::new(Arc::new(bus.clone()), &config, tx.clone(), cancel.clone());
        let l = ChannelListener::new(&user(), Duration::from_millis(100), tx);
        let task = tokio::spawn(l.run(supervisor));

        // A failed attempt and a dropped session, each followed by a 5s backoff.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(bus.connects(), 2);
        assert_eq!(bus.subscriptions().len(), 5);

        cancel.cancel();
        task.await.unwrap().unwrap();

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, LightEvent::OverallStatus(Status::Alert))));
    }
}
