//! RabbitMQ implementation of the broker traits (AMQP 0-9-1 via lapin)

use super::{
    BrokerConnection, BrokerError, Delivery, DeliveryTag, QueueChannel, QueueHandle, Result,
    SubscribeOptions, Subscription,
};
use crate::config::BrokerSettings;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tracing::{debug, info};

const DELIVERY_MODE_TRANSIENT: u8 = 1;
const DELIVERY_MODE_PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;
const JSON_CONTENT_TYPE: &str = "application/json";

/// Single AMQP connection, owned by the publisher or the consumer
pub struct AmqpConnection {
    uri: AMQPUri,
    inner: Option<Connection>,
}

impl AmqpConnection {
    /// Connect to the broker described by `settings`.
    ///
    /// Authentication and transport failures both surface as
    /// [`BrokerError::Connect`]; nothing is retried.
    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        let uri = amqp_uri(settings);
        let inner = open(&uri).await?;
        Ok(Self {
            uri,
            inner: Some(inner),
        })
    }
}

fn amqp_uri(settings: &BrokerSettings) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: settings.user.clone(),
                password: settings.pass.clone(),
            },
            host: settings.host.clone(),
            port: settings.port,
        },
        vhost: settings.vhost.clone(),
        ..Default::default()
    }
}

async fn open(uri: &AMQPUri) -> Result<Connection> {
    let authority = &uri.authority;
    debug!(
        host = %authority.host,
        port = authority.port,
        vhost = %uri.vhost,
        "Connecting to RabbitMQ"
    );

    let connection = Connection::connect_uri(uri.clone(), ConnectionProperties::default())
        .await
        .map_err(|e| BrokerError::Connect(e.to_string()))?;

    info!(host = %authority.host, port = authority.port, "Connected to RabbitMQ");
    Ok(connection)
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    type Channel = AmqpChannel;

    fn is_connected(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|conn| conn.status().connected())
    }

    async fn create_channel(&self) -> Result<AmqpChannel> {
        let conn = self
            .inner
            .as_ref()
            .filter(|conn| conn.status().connected())
            .ok_or(BrokerError::NotConnected)?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        Ok(AmqpChannel { inner: channel })
    }

    async fn close(&mut self) -> Result<()> {
        let Some(conn) = self.inner.take() else {
            return Ok(());
        };

        if conn.status().connected() {
            conn.close(REPLY_SUCCESS, "Normal shutdown")
                .await
                .map_err(|e| BrokerError::Close(e.to_string()))?;
            info!("RabbitMQ connection closed");
        }

        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.close().await?;
        self.inner = Some(open(&self.uri).await?);
        Ok(())
    }
}

/// AMQP channel; deliveries are settled on the channel they arrived on
pub struct AmqpChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl QueueChannel for AmqpChannel {
    type Subscription = AmqpSubscription;

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueHandle> {
        let options = QueueDeclareOptions {
            durable,
            ..Default::default()
        };

        let queue = self
            .inner
            .queue_declare(name, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Declare {
                queue: name.to_string(),
                reason: e.to_string(),
            })?;

        debug!(
            queue = name,
            durable,
            messages = queue.message_count(),
            "Queue declared"
        );

        Ok(QueueHandle {
            name: name.to_string(),
            durable,
        })
    }

    async fn publish(&self, queue: &QueueHandle, payload: &[u8], persistent: bool) -> Result<()> {
        let delivery_mode = if persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };

        let properties = BasicProperties::default()
            .with_delivery_mode(delivery_mode)
            .with_content_type(JSON_CONTENT_TYPE.into());

        // Default exchange routes by queue name
        let confirmation = self
            .inner
            .basic_publish(
                "",
                &queue.name,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(BrokerError::Publish(format!(
                "broker refused message for queue '{}'",
                queue.name
            )));
        }

        debug!(queue = %queue.name, size = payload.len(), persistent, "Message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &QueueHandle,
        options: SubscribeOptions,
    ) -> Result<AmqpSubscription> {
        self.inner
            .basic_qos(options.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let consume_options = BasicConsumeOptions {
            no_ack: !options.manual_ack,
            ..Default::default()
        };

        let consumer = self
            .inner
            .basic_consume(
                &queue.name,
                &options.consumer_tag,
                consume_options,
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        info!(
            queue = %queue.name,
            consumer_tag = %options.consumer_tag,
            prefetch = options.prefetch,
            "Subscribed"
        );

        Ok(AmqpSubscription { consumer })
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        self.inner
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Settle {
                tag,
                reason: e.to_string(),
            })
    }

    async fn reject(&self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        self.inner
            .basic_reject(tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| BrokerError::Settle {
                tag,
                reason: e.to_string(),
            })
    }
}

pub struct AmqpSubscription {
    consumer: lapin::Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let next = self.consumer.next().await?;

        Some(
            next.map(|delivery| Delivery {
                tag: delivery.delivery_tag,
                payload: delivery.data,
                redelivered: delivery.redelivered,
            })
            .map_err(|e| BrokerError::Subscribe(e.to_string())),
        )
    }
}
