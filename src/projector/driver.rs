use super::codes::{ErrorFlags, PowerStatus, Warnings, item};
use crate::error::CommandError;
use crate::protocol::frame::command;
use crate::protocol::{Reply, SerialLink};

/// Typed commands of the projector, issued over a shared [`SerialLink`].
///
/// Failures (timeouts, NAKs) are returned untouched.
#[derive(Clone, Copy)]
pub struct Projector<'a, const DEPTH: usize = 8> {
    link: &'a SerialLink<DEPTH>,
}

impl<'a, const DEPTH: usize> Projector<'a, DEPTH> {
    pub fn new(link: &'a SerialLink<DEPTH>) -> Self {
        Self { link }
    }

    /// Raw command access.
    pub async fn command(&self, item: u16, cmd: u8, data: u16) -> Result<Reply, CommandError> {
        self.link.send(item, cmd, data).await
    }

    /// Reads an item's value.
    pub async fn get(&self, item: u16) -> Result<u16, CommandError> {
        match self.command(item, command::GET_RQ, 0).await? {
            Reply::Data(data) => Ok(data),
            Reply::Sent => Err(CommandError::UnexpectedResponse(command::GET_RQ)),
        }
    }

    pub async fn status_error(&self) -> Result<ErrorFlags, CommandError> {
        self.get(item::STATUS_ERROR).await.map(ErrorFlags)
    }

    pub async fn status_error2(&self) -> Result<Warnings, CommandError> {
        self.get(item::STATUS_ERROR2).await.map(Warnings)
    }

    pub async fn status_power(&self) -> Result<PowerStatus, CommandError> {
        self.get(item::STATUS_POWER).await.map(PowerStatus::from_code)
    }

    /// Lamp hours.
    pub async fn lamp_timer(&self) -> Result<u16, CommandError> {
        self.get(item::LAMP_TIMER).await
    }

    pub async fn power_on(&self) -> Result<(), CommandError> {
        self.command(item::IR_POWER_ON, command::SET_RQ, 0)
            .await
            .map(|_| ())
    }

    pub async fn power_off(&self) -> Result<(), CommandError> {
        self.command(item::IR_POWER_OFF, command::SET_RQ, 0)
            .await
            .map(|_| ())
    }
}
