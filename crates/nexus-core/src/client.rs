//! Conversational client
//!
//! [`ChatClient`] turns prompts into [`RequestEnvelope`]s, sends them over a
//! [`Transport`], and hands the reply back as a stream of growing partial
//! strings. It owns the two agents and the dialogue [`History`].

use crate::agent::Agent;
use crate::config::{ClientConfig, ConfigError};
use crate::envelope::{RequestEnvelope, SamplingParams};
use crate::history::History;
use crate::mood::{self, MoodOutcome};
use crate::prompts;
use futures::{Stream, StreamExt};
use nexus_wire::{Connection, Connector, TcpConnector, Transport, WireError};
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Weather reported in the contextual information unless overridden.
pub const DEFAULT_WEATHER: &str = "sunny";

/// A reply as it arrives: each item is the whole reply so far.
///
/// Items only ever grow. A transport failure is yielded as a final `Err`.
pub type ReplyStream<'a> = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send + 'a>>;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] WireError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Chat session with a remote text-generation service.
#[derive(Debug)]
pub struct ChatClient<T> {
    transport: T,
    user: Agent,
    bot: Agent,
    history: History,
    sampling: SamplingParams,
    weather: String,
}

impl ChatClient<Connection<TcpConnector>> {
    /// Connect to the server named in `config`.
    ///
    /// Refused connections are retried until the server comes up, so this
    /// only returns once connected or on a non-retryable failure.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let connection = Connection::new(config.connector(), config.connection_config())?;
        connection.start();
        connection.wait_connected().await?;
        Ok(Self::from_config(connection, config))
    }
}

impl<C: Connector> ChatClient<Connection<C>> {
    /// Drop the current stream and connect again.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.transport.reconnect().await?;
        Ok(())
    }

    /// Stop the connection and join its background tasks.
    pub async fn close(&self) {
        self.transport.stop().await;
        info!("Chat client closed");
    }
}

impl<T: Transport> ChatClient<T> {
    /// Create a client with default sampling parameters
    pub fn new(transport: T, user_name: impl Into<String>, bot_name: impl Into<String>) -> Self {
        Self::with_history(transport, user_name, bot_name, History::new())
    }

    /// Resume a session from an earlier history, e.g. one restored by
    /// [`History::load`]. New turns are appended after its entries.
    pub fn with_history(
        transport: T,
        user_name: impl Into<String>,
        bot_name: impl Into<String>,
        history: History,
    ) -> Self {
        Self {
            transport,
            user: Agent::new(user_name),
            bot: Agent::new(bot_name),
            history,
            sampling: SamplingParams::default(),
            weather: DEFAULT_WEATHER.to_string(),
        }
    }

    /// Create a client with names and sampling taken from `config`
    pub fn from_config(transport: T, config: &ClientConfig) -> Self {
        let mut client = Self::new(transport, config.user_name.clone(), config.bot_name.clone());
        client.sampling = config.sampling.clone();
        client
    }

    pub fn user(&self) -> &Agent {
        &self.user
    }

    pub fn bot(&self) -> &Agent {
        &self.bot
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn sampling_mut(&mut self) -> &mut SamplingParams {
        &mut self.sampling
    }

    pub fn set_weather(&mut self, weather: impl Into<String>) {
        self.weather = weather.into();
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn dialogue_rules(&self) -> String {
        prompts::render(
            prompts::DIALOGUE_RULES,
            &[
                ("speaker_name", self.bot.name()),
                ("listener_name", self.user.name()),
            ],
        )
    }

    /// Summary of the bot's mood stats, e.g. `"Bot's mood stats:\nhappy: 1, sad: 0\n"`
    pub fn mood_stats(&self) -> String {
        let stats = self
            .bot
            .mood_stats()
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}'s mood stats:\n{}\n", self.bot.name(), stats)
    }

    pub fn contextual_information(&self) -> String {
        let date_time = chrono::Local::now()
            .format("%m/%d/%Y, %I:%M:%S %p")
            .to_string();
        prompts::render(
            prompts::CONTEXTUAL_INFORMATION,
            &[("date_time", &date_time), ("weather", &self.weather)],
        )
    }

    pub fn dialogue_instructions(&self) -> String {
        prompts::render(
            prompts::DIALOGUE_INSTRUCTIONS,
            &[
                ("dialogue_rules", &self.dialogue_rules()),
                ("mood_stats", &self.mood_stats()),
                ("contextual_information", &self.contextual_information()),
            ],
        )
    }

    pub fn update_mood_instructions(&self) -> String {
        prompts::render(
            prompts::UPDATE_MOOD_INSTRUCTIONS,
            &[
                ("speaker_name", self.bot.name()),
                ("mood_rules", prompts::MOOD_RULES),
            ],
        )
    }

    /// Send one request and stream the bot's reply.
    ///
    /// The transcript so far is appended to `instructions`. Each fragment
    /// has a leading `"<bot>: "` and any NUL characters removed before it
    /// is added to the reply. Nothing is recorded in the history; see
    /// [`ChatClient::record_reply`].
    pub async fn query(
        &mut self,
        prompt: &str,
        instructions: &str,
    ) -> Result<ReplyStream<'_>, ClientError> {
        let mut instructions = instructions.to_string();
        if !self.history.is_empty() {
            instructions.push_str(prompts::CONVERSATION_SO_FAR);
            instructions.push_str(&self.history.transcript());
        }

        let request = RequestEnvelope::new(
            &self.history,
            &self.bot,
            &self.user,
            &instructions,
            prompt,
            &self.sampling,
        )
        .to_json()?;

        debug!("Sending query ({} history entries)", self.history.len());
        self.transport.send_message(&request).await?;

        let prefix = format!("{}: ", self.bot.name());
        let fragments = self.transport.receive_message();
        Ok(Box::pin(fragments.scan(
            String::new(),
            move |reply, fragment| {
                let item = match fragment {
                    Ok(text) => {
                        reply.push_str(&clean_fragment(&text, &prefix));
                        Ok(reply.clone())
                    }
                    Err(e) => {
                        warn!("Reply ended early: {}", e);
                        Err(ClientError::from(e))
                    }
                };
                futures::future::ready(Some(item))
            },
        )))
    }

    /// Ask the bot to open the conversation
    pub async fn greeting(&mut self) -> Result<ReplyStream<'_>, ClientError> {
        let prompt = prompts::render(prompts::GREETING_PROMPT, &[("speaker_name", self.bot.name())]);
        let instructions = self.dialogue_instructions();
        self.query(&prompt, &instructions).await
    }

    /// Ask the bot for its next turn
    pub async fn respond(&mut self) -> Result<ReplyStream<'_>, ClientError> {
        let prompt = prompts::render(prompts::RESPONSE_PROMPT, &[("speaker_name", self.bot.name())]);
        let instructions = self.dialogue_instructions();
        self.query(&prompt, &instructions).await
    }

    /// Ask the service for a mood update and apply it to the bot.
    ///
    /// A reply without a mood block, or with one that does not parse,
    /// leaves the bot unchanged.
    pub async fn update_mood(&mut self) -> Result<MoodOutcome, ClientError> {
        let stats = self
            .bot
            .mood_stats()
            .iter()
            .map(|(name, value)| format!("\"{name}\": {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = prompts::render(
            prompts::UPDATE_MOOD_PROMPT,
            &[("agent_name", self.bot.name()), ("stats", &stats)],
        );
        let instructions = self.update_mood_instructions();

        let reply = collect_reply(self.query(&prompt, &instructions).await?).await?;
        Ok(mood::apply_reply(&mut self.bot, &reply))
    }

    /// Record the user's turn, optionally update the bot's mood, then
    /// stream the bot's response.
    pub async fn submit_prompt(
        &mut self,
        text: &str,
        update_mood: bool,
    ) -> Result<ReplyStream<'_>, ClientError> {
        self.history.record(&self.user, text);
        if update_mood {
            self.update_mood().await?;
        }
        self.respond().await
    }

    /// Append a finished reply as the bot's turn
    pub fn record_reply(&mut self, reply: impl Into<String>) {
        self.history.record(&self.bot, reply);
    }

    /// Run one full exchange.
    ///
    /// `on_partial` sees every partial reply. The final reply is recorded
    /// as the bot's turn only if it arrived completely; on error the
    /// history holds the user's turn alone.
    pub async fn converse<F>(
        &mut self,
        text: &str,
        update_mood: bool,
        mut on_partial: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str) + Send,
    {
        let mut replies = self.submit_prompt(text, update_mood).await?;
        let mut reply = String::new();
        while let Some(partial) = replies.next().await {
            reply = partial?;
            on_partial(&reply);
        }
        drop(replies);

        self.record_reply(reply.clone());
        Ok(reply)
    }
}

/// Drain a reply stream and return the final reply
pub async fn collect_reply(mut replies: ReplyStream<'_>) -> Result<String, ClientError> {
    let mut reply = String::new();
    while let Some(partial) = replies.next().await {
        reply = partial?;
    }
    Ok(reply)
}

fn clean_fragment(text: &str, prefix: &str) -> String {
    text.strip_prefix(prefix).unwrap_or(text).replace('\0', "")
}
