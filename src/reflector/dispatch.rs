//! Client request dispatch.
//!
//! One [`Command`] is one client request. Pending config updates are picked
//! up before it runs and every session's pending batch is flushed after it,
//! so a request's notifications never straddle two requests.

use tracing::{instrument, warn};

use super::types::{Command, CommandOutcome};
use super::Reflector;
use crate::error::Result;
use crate::matcher::PutOutcome;
use crate::notify::Outbound;

impl Reflector {
    /// Run one client request on behalf of `session`.
    ///
    /// A `Batch` never fails as a whole: each sub-command's result is
    /// reported separately and a failure doesn't stop the ones after it.
    #[instrument(skip(self, command), fields(session = %session, op = command.name()))]
    pub fn execute(&mut self, session: &str, command: Command) -> Result<CommandOutcome> {
        self.apply_config_updates();
        let result = self.run_command(session, command);
        self.flush_all();
        result
    }

    fn run_command(&mut self, session: &str, command: Command) -> Result<CommandOutcome> {
        let applied = |affected: usize| CommandOutcome::Applied { affected };
        match command {
            Command::SetNode { path, payload, flags } => {
                self.set_node(session, &path, payload, flags).map(|_| applied(1))
            }
            Command::RemoveNodes { pattern, filter, quiet } => {
                self.remove_nodes(session, &pattern, filter, quiet).map(applied)
            }
            Command::InsertOrdered { pattern, payload, before } => self
                .insert_ordered_node(session, &pattern, payload, before.as_deref())
                .map(|ids| applied(ids.len())),
            Command::Reorder { pattern, before } => {
                self.reorder_node(session, &pattern, before.as_deref()).map(applied)
            }
            Command::Subscribe { pattern, filter, quiet } => self
                .subscribe(session, &pattern, filter, quiet)
                .map(|outcome| applied(usize::from(outcome != PutOutcome::Unchanged))),
            Command::Unsubscribe { pattern } => self.unsubscribe(session, &pattern).map(applied),
            Command::GetData { pattern, filter } => self.get_data(session, &pattern, filter).map(applied),
            Command::JettisonResults { pattern, filter } => self
                .jettison_results(session, pattern.as_deref(), filter)
                .map(applied),
            Command::Ping { payload } => self.reply(session, Outbound::Pong { payload }).map(|()| applied(1)),
            Command::Batch { commands } => {
                let results = commands
                    .into_iter()
                    .map(|c| self.run_command(session, c))
                    .collect();
                Ok(CommandOutcome::Batch(results))
            }
            Command::Unknown { code } => {
                self.reply(session, Outbound::Unimplemented { code })?;
                warn!(code, "Bounced unimplemented command");
                crate::metrics::record_operation("unknown", "bounced");
                Ok(CommandOutcome::Bounced { code })
            }
        }
    }
}
