//! Exchange and queue declarations shared by both sides of the bus.
//!
//! The queue is declared by the publisher before every send and by the
//! consumer before subscribing, always with the same flags and arguments;
//! RabbitMQ refuses a redeclaration that differs.
//!
//! With a dead-letter exchange configured the consumer also declares that
//! exchange (fanout) and a `<queue>.dead-letter` queue bound to it. RabbitMQ
//! drops messages dead-lettered to an exchange that does not exist.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::{Channel, ExchangeKind};

use crate::config::{ConsumerConfig, RabbitMqConfig};

/// Queue argument naming the dead-letter exchange.
pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";

/// Suffix of the queue that collects dead-lettered messages.
pub const DEAD_LETTER_QUEUE_SUFFIX: &str = ".dead-letter";

/// Names and options of the broker entities this service uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Fanout exchange declared by the consumer side
    pub exchange: String,
    /// Queue events are published to and consumed from
    pub queue: String,
    /// Optional dead-letter exchange for rejected messages
    pub dead_letter_exchange: Option<String>,
}

/// One broker entity to declare, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Exchange { name: String },
    Queue { name: String, arguments: FieldTable },
    Binding { queue: String, exchange: String },
}

impl Topology {
    /// Topology from configuration.
    pub fn from_config(rabbitmq: &RabbitMqConfig, consumer: &ConsumerConfig) -> Self {
        Self {
            exchange: rabbitmq.exchange.clone(),
            queue: rabbitmq.queue_name.clone(),
            dead_letter_exchange: consumer.dead_letter_exchange.clone(),
        }
    }

    /// Non-durable, non-exclusive, not auto-deleted.
    pub fn queue_options() -> QueueDeclareOptions {
        QueueDeclareOptions {
            durable: false,
            exclusive: false,
            auto_delete: false,
            ..Default::default()
        }
    }

    /// Queue arguments; empty unless a dead-letter exchange is configured.
    pub fn queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        if let Some(exchange) = &self.dead_letter_exchange {
            arguments.insert(
                DEAD_LETTER_EXCHANGE_ARG.into(),
                AMQPValue::LongString(LongString::from(exchange.clone())),
            );
        }
        arguments
    }

    /// Queue receiving dead-lettered messages, when a dead-letter exchange is set.
    pub fn dead_letter_queue(&self) -> Option<String> {
        self.dead_letter_exchange
            .as_ref()
            .map(|_| format!("{}{}", self.queue, DEAD_LETTER_QUEUE_SUFFIX))
    }

    /// Everything the consumer declares before subscribing.
    pub fn consumer_declarations(&self) -> Vec<Declaration> {
        let mut declarations = Vec::new();

        if let (Some(exchange), Some(queue)) =
            (&self.dead_letter_exchange, self.dead_letter_queue())
        {
            declarations.push(Declaration::Exchange {
                name: exchange.clone(),
            });
            declarations.push(Declaration::Queue {
                name: queue.clone(),
                arguments: FieldTable::default(),
            });
            declarations.push(Declaration::Binding {
                queue,
                exchange: exchange.clone(),
            });
        }

        declarations.push(Declaration::Exchange {
            name: self.exchange.clone(),
        });
        declarations.push(self.main_queue());
        declarations
    }

    /// Declare the consumer side on `channel`.
    pub async fn declare_consumer_side(&self, channel: &Channel) -> Result<(), lapin::Error> {
        for declaration in self.consumer_declarations() {
            declaration.apply(channel).await?;
        }
        Ok(())
    }

    /// Declare the queue. Idempotent as long as the options do not change.
    pub async fn declare_queue(&self, channel: &Channel) -> Result<(), lapin::Error> {
        self.main_queue().apply(channel).await
    }

    fn main_queue(&self) -> Declaration {
        Declaration::Queue {
            name: self.queue.clone(),
            arguments: self.queue_arguments(),
        }
    }
}

impl Declaration {
    async fn apply(self, channel: &Channel) -> Result<(), lapin::Error> {
        match self {
            Declaration::Exchange { name } => {
                channel
                    .exchange_declare(
                        &name,
                        ExchangeKind::Fanout,
                        ExchangeDeclareOptions::default(),
                        FieldTable::default(),
                    )
                    .await
            }
            Declaration::Queue { name, arguments } => {
                channel
                    .queue_declare(&name, Topology::queue_options(), arguments)
                    .await?;
                Ok(())
            }
            Declaration::Binding { queue, exchange } => {
                channel
                    .queue_bind(
                        &queue,
                        &exchange,
                        "",
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
            }
        }
    }
}
