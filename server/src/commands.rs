//! Command dispatch: resolves a command's descriptor, checks the declared
//! argument shape, and executes it against the storage interaction.
//!
//! All human-readable and structured output for one request goes into an
//! `Output` owned by that request, drained exactly once into the response.
//! Nothing is shared across requests.

use log::{info, warn};
use shared::{Arity, CommandKind, Status, WorkerDraft};
use std::sync::Arc;

use crate::error::{Result, ServerError};
use crate::interaction::Interaction;
use crate::persist::Backend;

/// Per-request output buffer: accumulated text lines plus structured items
/// (ids, organization names, counts).
#[derive(Debug, Default)]
pub struct Output {
    lines: Vec<String>,
    items: Vec<String>,
}

impl Output {
    pub fn new() -> Self {
        Output::default()
    }

    pub fn line<S: Into<String>>(&mut self, line: S) {
        self.lines.push(line.into());
    }

    pub fn item<S: Into<String>>(&mut self, item: S) {
        self.items.push(item.into());
    }

    /// Consumes the buffer into (body, structured items).
    pub fn drain(self) -> (String, Vec<String>) {
        (self.lines.join("\n"), self.items)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    interaction: Interaction,
    backend: Arc<dyn Backend>,
}

impl Dispatcher {
    pub fn new(interaction: Interaction, backend: Arc<dyn Backend>) -> Self {
        Dispatcher {
            interaction,
            backend,
        }
    }

    /// Executes one already-authenticated command. Errors fold into a
    /// failure response at the transport layer; they never tear down the
    /// serve loop.
    pub async fn dispatch(
        &self,
        kind: CommandKind,
        argument: Option<&str>,
        draft: Option<WorkerDraft>,
        out: &mut Output,
    ) -> Result<()> {
        check_arity(kind, argument.is_some(), draft.is_some())?;

        match kind {
            CommandKind::Register | CommandKind::Login => Err(ServerError::Argument(
                "auth commands are handled by the gateway".to_string(),
            )),

            CommandKind::Show => {
                let body = self.interaction.show().await;
                if body.is_empty() {
                    out.line("the collection is empty");
                } else {
                    out.line(body);
                }
                Ok(())
            }

            CommandKind::Info => {
                out.line(self.interaction.info().await);
                Ok(())
            }

            CommandKind::Add => {
                let id = self.interaction.add(need_draft(draft)?).await?;
                out.line(format!("added worker #{}", id));
                out.item(id.to_string());
                Ok(())
            }

            CommandKind::Update => {
                let id = parse_id(need_argument(argument)?)?;
                self.interaction.update(id, need_draft(draft)?).await?;
                out.line(format!("updated worker #{}", id));
                Ok(())
            }

            CommandKind::RemoveById => {
                let id = parse_id(need_argument(argument)?)?;
                if self.interaction.remove_by_id(id).await {
                    out.line(format!("removed worker #{}", id));
                    Ok(())
                } else {
                    Err(ServerError::NotFound(id))
                }
            }

            CommandKind::Clear => {
                self.interaction.clear().await;
                out.line("collection cleared");
                Ok(())
            }

            CommandKind::AddIfMin => {
                match self.interaction.add_if_min(need_draft(draft)?).await? {
                    Some(id) => {
                        out.line(format!("added worker #{} with a new minimum salary", id));
                        out.item(id.to_string());
                    }
                    None => {
                        out.line("salary is not below the current minimum; nothing added");
                    }
                }
                Ok(())
            }

            CommandKind::RemoveGreater => {
                let removed = self.interaction.remove_greater(&need_draft(draft)?).await;
                out.line(format!("removed {} workers with greater salary", removed.len()));
                for id in removed {
                    out.item(id.to_string());
                }
                Ok(())
            }

            CommandKind::RemoveLower => {
                let removed = self.interaction.remove_lower(&need_draft(draft)?).await;
                out.line(format!("removed {} workers with lower salary", removed.len()));
                for id in removed {
                    out.item(id.to_string());
                }
                Ok(())
            }

            CommandKind::CountByStatus => {
                let status: Status = need_argument(argument)?
                    .parse()
                    .map_err(ServerError::Argument)?;
                let count = self.interaction.count_by_status(status).await;
                out.line(format!("{} workers with status {}", count, status));
                out.item(count.to_string());
                Ok(())
            }

            CommandKind::PrintAscending => {
                let body = self.interaction.print_ascending().await;
                if body.is_empty() {
                    out.line("the collection is empty");
                } else {
                    out.line(body);
                }
                Ok(())
            }

            CommandKind::PrintUniqueOrganization => {
                let names = self.interaction.unique_organizations().await;
                out.line(format!("{} distinct organizations", names.len()));
                for name in names {
                    out.item(name);
                }
                Ok(())
            }

            CommandKind::Exit => {
                // Privileged: flush the collection synchronously before any
                // further requests see the store.
                info!("exit requested; flushing collection");
                let snapshot = self.interaction.snapshot().await;
                match self.backend.save_collection(&snapshot) {
                    Ok(()) => {
                        out.line(format!("collection saved ({} workers)", snapshot.len()));
                        Ok(())
                    }
                    Err(e) => {
                        warn!("flush failed, will retry on next save: {}", e);
                        Err(e)
                    }
                }
            }
        }
    }
}

/// Compares the request's argument shape against the command descriptor.
fn check_arity(kind: CommandKind, has_argument: bool, has_draft: bool) -> Result<()> {
    let expected = kind.descriptor().arity;
    let (want_argument, want_draft) = match expected {
        Arity::None => (false, false),
        Arity::Text => (true, false),
        Arity::Payload => (false, true),
        Arity::TextAndPayload => (true, true),
    };
    if has_argument != want_argument || has_draft != want_draft {
        return Err(ServerError::Argument(format!(
            "command {} got an argument shape it does not declare",
            kind.name()
        )));
    }
    Ok(())
}

fn need_argument(argument: Option<&str>) -> Result<&str> {
    argument.ok_or_else(|| ServerError::Argument("string argument required".to_string()))
}

fn need_draft(draft: Option<WorkerDraft>) -> Result<WorkerDraft> {
    draft.ok_or_else(|| ServerError::Argument("worker payload required".to_string()))
}

fn parse_id(raw: &str) -> Result<u64> {
    let id: u64 = raw
        .trim()
        .parse()
        .map_err(|_| ServerError::Argument(format!("{} is not a valid id", raw)))?;
    if id == 0 {
        return Err(ServerError::Argument("id must be positive".to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryBackend;
    use crate::store::Store;
    use shared::{Coordinates, Organization, Position};

    fn draft(name: &str, salary: f64) -> WorkerDraft {
        WorkerDraft {
            name: name.to_string(),
            coordinates: Coordinates { x: 0.0, y: 0.0 },
            salary,
            end_date: None,
            position: Position::Laborer,
            status: Status::Hired,
            organization: Organization {
                name: "Acme".to_string(),
                org_type: None,
                annual_turnover: None,
                address: None,
            },
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let interaction = Interaction::new(Store::new(u64::MAX));
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        (Dispatcher::new(interaction, dyn_backend), backend)
    }

    #[tokio::test]
    async fn test_add_then_show() {
        let (dispatcher, _) = dispatcher();

        let mut out = Output::new();
        dispatcher
            .dispatch(CommandKind::Add, None, Some(draft("Alice", 1200.0)), &mut out)
            .await
            .unwrap();
        let (body, items) = out.drain();
        assert!(body.contains("added worker #1"));
        assert_eq!(items, vec!["1".to_string()]);

        let mut out = Output::new();
        dispatcher
            .dispatch(CommandKind::Show, None, None, &mut out)
            .await
            .unwrap();
        let (body, _) = out.drain();
        assert!(body.contains("Alice"));
    }

    #[tokio::test]
    async fn test_arity_mismatch_is_an_error() {
        let (dispatcher, _) = dispatcher();

        // Add without a payload
        let mut out = Output::new();
        let err = dispatcher
            .dispatch(CommandKind::Add, None, None, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Argument(_)));

        // Show with a stray payload
        let mut out = Output::new();
        let err = dispatcher
            .dispatch(CommandKind::Show, None, Some(draft("x", 1.0)), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Argument(_)));

        // Update missing its id argument
        let mut out = Output::new();
        let err = dispatcher
            .dispatch(CommandKind::Update, None, Some(draft("x", 1.0)), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Argument(_)));
    }

    #[tokio::test]
    async fn test_remove_missing_id_reports_not_found() {
        let (dispatcher, _) = dispatcher();
        let mut out = Output::new();
        let err = dispatcher
            .dispatch(CommandKind::RemoveById, Some("42"), None, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(42)));
    }

    #[tokio::test]
    async fn test_bad_id_and_bad_status_arguments() {
        let (dispatcher, _) = dispatcher();

        let mut out = Output::new();
        let err = dispatcher
            .dispatch(CommandKind::RemoveById, Some("forty-two"), None, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Argument(_)));

        let mut out = Output::new();
        let err = dispatcher
            .dispatch(CommandKind::CountByStatus, Some("astronaut"), None, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Argument(_)));
    }

    #[tokio::test]
    async fn test_count_by_status_output() {
        let (dispatcher, _) = dispatcher();
        let mut out = Output::new();
        dispatcher
            .dispatch(CommandKind::Add, None, Some(draft("a", 100.0)), &mut out)
            .await
            .unwrap();

        let mut out = Output::new();
        dispatcher
            .dispatch(CommandKind::CountByStatus, Some("hired"), None, &mut out)
            .await
            .unwrap();
        let (body, items) = out.drain();
        assert!(body.contains("1 workers with status hired"));
        assert_eq!(items, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_exit_flushes_to_backend() {
        let (dispatcher, backend) = dispatcher();
        let mut out = Output::new();
        dispatcher
            .dispatch(CommandKind::Add, None, Some(draft("a", 100.0)), &mut out)
            .await
            .unwrap();

        let mut out = Output::new();
        dispatcher
            .dispatch(CommandKind::Exit, None, None, &mut out)
            .await
            .unwrap();

        assert_eq!(backend.load_collection().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unique_organization_items() {
        let (dispatcher, _) = dispatcher();
        for name in ["a", "b"] {
            let mut payload = draft(name, 100.0);
            payload.organization.name = format!("Org-{}", name);
            let mut out = Output::new();
            dispatcher
                .dispatch(CommandKind::Add, None, Some(payload), &mut out)
                .await
                .unwrap();
        }

        let mut out = Output::new();
        dispatcher
            .dispatch(CommandKind::PrintUniqueOrganization, None, None, &mut out)
            .await
            .unwrap();
        let (body, items) = out.drain();
        assert!(body.contains("2 distinct organizations"));
        assert_eq!(items.len(), 2);
    }
}
