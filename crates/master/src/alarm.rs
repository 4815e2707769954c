//! Alarm reporting
//!
//! Producers enqueue alarms without blocking; a delivery task resolves the
//! receivers of the alarm's cluster and posts a mail and an SMS message to
//! the alarm gateway.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::config::AlarmConfig;

/// Receivers registered under this cluster id get every alarm
pub const SYSTEM_CLUSTER_ID: u64 = 0;

const TITLE_PREFIX: &str = "SHARKSTORE ALARM ";
const USER_AGENT: &str = "Jimdb-Message-Sender";

/// Alarm delivery error
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cluster[{0}] no receiver")]
    NoReceiver(u64),
    #[error("gateway returned {0}")]
    Gateway(reqwest::StatusCode),
}

/// How the alarm value compares to the rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareType {
    Equal,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl fmt::Display for CompareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareType::Equal => "EQUAL",
            CompareType::Greater => "GREATER",
            CompareType::GreaterOrEqual => "GREATER_OR_EQUAL",
            CompareType::Less => "LESS",
            CompareType::LessOrEqual => "LESS_OR_EQUAL",
        };
        f.write_str(s)
    }
}

/// One triggered alarm rule
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmMessage {
    pub cluster_id: u64,
    pub app_name: String,
    pub ip_addr: String,
    pub rule_name: String,
    pub alarm_value: f64,
    pub compare_type: CompareType,
    pub threshold: f64,
    pub remarks: Vec<String>,
}

impl AlarmMessage {
    pub fn title(&self) -> String {
        format!("{}{}", TITLE_PREFIX, self.rule_name)
    }

    fn summary(&self) -> String {
        format!(
            "ClusterId[{}] AppName[{}] IpAddr[{}] Trigger RuleName[{}] AlarmValue[{}] CompareType[{}] AlarmThreshold[{}]",
            self.cluster_id,
            self.app_name,
            self.ip_addr,
            self.rule_name,
            self.alarm_value,
            self.compare_type,
            self.threshold
        )
    }

    pub fn mail_content(&self) -> String {
        let mut content = format!("{}<br>", self.summary());
        for remark in &self.remarks {
            content.push_str(&format!(" Remark[{}]<br>", remark));
        }
        content
    }

    pub fn sms_content(&self) -> String {
        format!("{}{}", self.title(), self.summary())
    }
}

/// Body posted to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMessage {
    pub title: String,
    pub content: String,
    pub mail_to: String,
    pub sms_to: String,
}

/// Alarm recipient of one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmReceiver {
    pub cluster_id: u64,
    pub mail: String,
    pub tel: String,
}

/// Receivers by cluster id
#[derive(Debug, Default)]
pub struct ReceiverBook {
    receivers: RwLock<HashMap<u64, Vec<AlarmReceiver>>>,
}

impl ReceiverBook {
    pub fn new(receivers: impl IntoIterator<Item = AlarmReceiver>) -> Self {
        let book = Self::default();
        for r in receivers {
            book.add(r);
        }
        book
    }

    pub fn add(&self, receiver: AlarmReceiver) {
        self.receivers
            .write()
            .entry(receiver.cluster_id)
            .or_default()
            .push(receiver);
    }

    /// Mail and phone lists for `cluster_id`, system receivers first
    pub fn resolve(&self, cluster_id: u64) -> Result<(Vec<String>, Vec<String>), AlarmError> {
        let receivers = self.receivers.read();
        let mut mail = Vec::new();
        let mut sms = Vec::new();
        let mut ids = vec![SYSTEM_CLUSTER_ID];
        if cluster_id != SYSTEM_CLUSTER_ID {
            ids.push(cluster_id);
        }
        for id in ids {
            match receivers.get(&id) {
                Some(list) if !list.is_empty() => {
                    for r in list {
                        mail.push(r.mail.clone());
                        sms.push(r.tel.clone());
                    }
                }
                _ => warn!("no receiver for cluster[{}]", id),
            }
        }
        if mail.is_empty() || sms.is_empty() {
            return Err(AlarmError::NoReceiver(cluster_id));
        }
        Ok((mail, sms))
    }
}

/// Producer side of the alarm queue
#[derive(Clone)]
pub struct AlarmReporter {
    tx: mpsc::Sender<AlarmMessage>,
}

impl AlarmReporter {
    /// Create the queue and its delivery half
    pub fn new(
        config: &AlarmConfig,
        receivers: Arc<ReceiverBook>,
    ) -> Result<(Self, AlarmDelivery), AlarmError> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let delivery = AlarmDelivery {
            gateway_addr: config.gateway_addr.clone(),
            http_client,
            receivers,
            rx,
        };
        Ok((Self { tx }, delivery))
    }

    /// Enqueue `msg`; a full or closed queue drops it with a warning
    pub fn report(&self, msg: AlarmMessage) -> bool {
        debug!(
            "alarm report append cluster id[{}] app name[{}] ip addr[{}] rule[{}]",
            msg.cluster_id, msg.app_name, msg.ip_addr, msg.rule_name
        );
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!("alarm queue full, dropping alarm {}", msg.rule_name);
                false
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                warn!("alarm queue closed, dropping alarm {}", msg.rule_name);
                false
            }
        }
    }
}

/// Consumer side of the alarm queue
pub struct AlarmDelivery {
    gateway_addr: String,
    http_client: reqwest::Client,
    receivers: Arc<ReceiverBook>,
    rx: mpsc::Receiver<AlarmMessage>,
}

impl AlarmDelivery {
    /// Deliver queued alarms until `shutdown` fires or every producer is gone
    pub async fn run(mut self, shutdown: Arc<Notify>) {
        info!("alarm delivery started, gateway {}", self.gateway_addr);
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = self.deliver(&msg).await {
                            error!("alarm report error: {}", e);
                        }
                    }
                    None => break,
                },
            }
        }
        info!("alarm delivery stopped");
    }

    async fn deliver(&self, msg: &AlarmMessage) -> Result<(), AlarmError> {
        let (mail, sms) = self.receivers.resolve(msg.cluster_id)?;
        self.post(&ReportMessage {
            title: msg.title(),
            content: msg.mail_content(),
            mail_to: mail.join(","),
            sms_to: String::new(),
        })
        .await?;
        self.post(&ReportMessage {
            title: msg.title(),
            content: msg.sms_content(),
            mail_to: String::new(),
            sms_to: sms.join(","),
        })
        .await
    }

    async fn post(&self, report: &ReportMessage) -> Result<(), AlarmError> {
        debug!("alarm report title is: {}", report.title);
        let resp = self
            .http_client
            .post(&self.gateway_addr)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::CONTENT_TYPE, "application/json;charset=utf-8")
            .header(reqwest::header::ACCEPT, "application/json,text/html,text/plain")
            .header(reqwest::header::ACCEPT_CHARSET, "utf-8,GBK")
            .header(reqwest::header::CONNECTION, "close")
            .json(report)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AlarmError::Gateway(resp.status()));
        }
        Ok(())
    }
}
