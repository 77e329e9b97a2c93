use std::sync::Arc;

use fleetops_core::{ScheduledUpdate, Ticket, TicketId, TicketStatus, UpdateStatus};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::EngineError;
use crate::registry::DeviceRegistry;

/// In-memory tickets, one per finished update.
#[derive(Clone)]
pub struct TicketingService {
    registry: DeviceRegistry,
    tickets: Arc<Mutex<Vec<Ticket>>>,
}

impl TicketingService {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            registry,
            tickets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Open a ticket describing a finished update.
    ///
    /// The ticket is closed when every target succeeded and open otherwise.
    pub async fn create_ticket(&self, update: &ScheduledUpdate) -> Result<Ticket, EngineError> {
        let client = self
            .registry
            .client(update.client_id)
            .await
            .ok_or(EngineError::ClientNotFound(update.client_id))?;

        let mut tickets = self.tickets.lock().await;
        let ticket = Ticket {
            id: TicketId(tickets.len() as u64 + 1),
            client_id: update.client_id,
            update_id: update.id,
            title: format!("Update {} for {}", update.status, client.name),
            description: format!(
                "Automated update {} for servers: {}",
                update.status,
                update.servers.join(", ")
            ),
            status: if update.status == UpdateStatus::Completed {
                TicketStatus::Closed
            } else {
                TicketStatus::Open
            },
            created_at: jiff::Timestamp::now(),
            results: update.results.clone().unwrap_or_default(),
        };
        tickets.push(ticket.clone());

        info!(
            ticket_id = %ticket.id,
            update_id = %update.id,
            status = ?ticket.status,
            "Ticket created"
        );
        Ok(ticket)
    }

    pub async fn tickets(&self) -> Vec<Ticket> {
        self.tickets.lock().await.clone()
    }
}
