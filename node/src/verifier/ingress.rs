use crate::{chain::Block, wire::Record, Error};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};

/// Message types that can be sent to the `Mailbox`
pub enum Message {
    /// Request the head of the chain.
    Latest { responder: oneshot::Sender<Option<Block>> },

    /// Request the genesis block.
    Genesis { responder: oneshot::Sender<Option<Block>> },

    /// Request the block recording the verdicts of a survey.
    Block {
        survey_id: String,
        responder: oneshot::Sender<Option<Block>>,
    },

    /// Request the stored envelopes of a survey.
    Proofs {
        survey_id: String,
        responder: oneshot::Sender<Vec<Record>>,
    },
}

/// Ingress mailbox for [`Engine`](super::Engine).
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &mut self,
        message: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> Result<T, Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(message(responder))
            .await
            .map_err(|_| Error::Network("mailbox closed"))?;
        receiver.await.map_err(|_| Error::Network("mailbox closed"))
    }

    /// Retrieve the head of the chain.
    pub async fn latest(&mut self) -> Result<Option<Block>, Error> {
        self.request(|responder| Message::Latest { responder }).await
    }

    /// Retrieve the genesis block.
    pub async fn genesis(&mut self) -> Result<Option<Block>, Error> {
        self.request(|responder| Message::Genesis { responder }).await
    }

    /// Retrieve the block of a survey.
    pub async fn block(&mut self, survey_id: &str) -> Result<Option<Block>, Error> {
        let survey_id = survey_id.to_string();
        self.request(|responder| Message::Block {
            survey_id,
            responder,
        })
        .await
    }

    /// Retrieve the envelopes stored for a survey.
    pub async fn proofs(&mut self, survey_id: &str) -> Result<Vec<Record>, Error> {
        let survey_id = survey_id.to_string();
        self.request(|responder| Message::Proofs {
            survey_id,
            responder,
        })
        .await
    }
}
