//! Enumerations shared across the REM platform

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Display body delegating to as_str, shared by the enums below.
macro_rules! fmt_as_str {
    () => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    };
}

/// How a row's sensitive fields were encrypted at write time.
///
/// The level is stamped once on insert and never changes; readers branch on
/// it to choose a decryption path, so history written under an older tenant
/// mode still replays correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionLevel {
    /// Row has no designated sensitive fields.
    #[default]
    None,
    /// Tenant opted out; plaintext stored.
    Disabled,
    /// AEAD with the tenant DEK; the server can decrypt.
    Platform,
    /// AEAD with the tenant DEK; the server returns ciphertext.
    Client,
    /// Hybrid RSA envelope; only the client's private key can decrypt.
    Sealed,
}

impl EncryptionLevel {
    /// Whether the server holds enough material to decrypt this row.
    pub fn server_decryptable(&self) -> bool {
        matches!(self, EncryptionLevel::Platform)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionLevel::None => "none",
            EncryptionLevel::Disabled => "disabled",
            EncryptionLevel::Platform => "platform",
            EncryptionLevel::Client => "client",
            EncryptionLevel::Sealed => "sealed",
        }
    }
}

impl fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(EncryptionLevel::None),
            "disabled" => Ok(EncryptionLevel::Disabled),
            "platform" => Ok(EncryptionLevel::Platform),
            "client" => Ok(EncryptionLevel::Client),
            "sealed" => Ok(EncryptionLevel::Sealed),
            other => Err(format!("unknown encryption level: {other}")),
        }
    }
}

/// Tenant-configured encryption mode. Determines the write path for new rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    #[default]
    Disabled,
    Platform,
    Client,
    Sealed,
}

impl EncryptionMode {
    /// The level a field written under this mode will carry.
    pub fn write_level(&self) -> EncryptionLevel {
        match self {
            EncryptionMode::Disabled => EncryptionLevel::Disabled,
            EncryptionMode::Platform => EncryptionLevel::Platform,
            EncryptionMode::Client => EncryptionLevel::Client,
            EncryptionMode::Sealed => EncryptionLevel::Sealed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::Disabled => "disabled",
            EncryptionMode::Platform => "platform",
            EncryptionMode::Client => "client",
            EncryptionMode::Sealed => "sealed",
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(EncryptionMode::Disabled),
            "platform" => Ok(EncryptionMode::Platform),
            "client" => Ok(EncryptionMode::Client),
            "sealed" => Ok(EncryptionMode::Sealed),
            other => Err(format!("unknown encryption mode: {other}")),
        }
    }
}

/// Role of an individual message row within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    ToolCall,
    ToolResponse,
    System,
    Observation,
    Memory,
    Think,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::ToolCall => "tool_call",
            MessageType::ToolResponse => "tool_response",
            MessageType::System => "system",
            MessageType::Observation => "observation",
            MessageType::Memory => "memory",
            MessageType::Think => "think",
        }
    }

    /// Tool plumbing rows are skipped when replaying history to the model.
    pub fn is_tool_row(&self) -> bool {
        matches!(self, MessageType::ToolCall | MessageType::ToolResponse)
    }
}

impl fmt::Display for MessageType {
    fmt_as_str!();
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageType::User),
            "assistant" => Ok(MessageType::Assistant),
            "tool_call" => Ok(MessageType::ToolCall),
            "tool_response" => Ok(MessageType::ToolResponse),
            "system" => Ok(MessageType::System),
            "observation" => Ok(MessageType::Observation),
            "memory" => Ok(MessageType::Memory),
            "think" => Ok(MessageType::Think),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// Kind of temporal moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentType {
    SessionChunk,
    ContentUpload,
    Dream,
    Reading,
    Reminder,
    Notification,
    VoiceNote,
    DailySummary,
}

impl MomentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MomentType::SessionChunk => "session_chunk",
            MomentType::ContentUpload => "content_upload",
            MomentType::Dream => "dream",
            MomentType::Reading => "reading",
            MomentType::Reminder => "reminder",
            MomentType::Notification => "notification",
            MomentType::VoiceNote => "voice_note",
            MomentType::DailySummary => "daily_summary",
        }
    }
}

impl fmt::Display for MomentType {
    fmt_as_str!();
}

impl FromStr for MomentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_chunk" => Ok(MomentType::SessionChunk),
            "content_upload" => Ok(MomentType::ContentUpload),
            "dream" => Ok(MomentType::Dream),
            "reading" => Ok(MomentType::Reading),
            "reminder" => Ok(MomentType::Reminder),
            "notification" => Ok(MomentType::Notification),
            "voice_note" => Ok(MomentType::VoiceNote),
            "daily_summary" => Ok(MomentType::DailySummary),
            other => Err(format!("unknown moment type: {other}")),
        }
    }
}

/// Processing lifecycle of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fmt_as_str!();
}

/// Status of a queued background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal states only move backward through the admin reset path.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fmt_as_str!();
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Worker size class for a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskTier {
    Micro,
    #[default]
    Small,
    Medium,
    Large,
}

impl TaskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskTier::Micro => "micro",
            TaskTier::Small => "small",
            TaskTier::Medium => "medium",
            TaskTier::Large => "large",
        }
    }

    /// Tier assignment for file processing by blob size.
    pub fn for_file_size(bytes: u64) -> Self {
        const MIB: u64 = 1024 * 1024;
        if bytes < MIB {
            TaskTier::Small
        } else if bytes < 50 * MIB {
            TaskTier::Medium
        } else {
            TaskTier::Large
        }
    }
}

impl fmt::Display for TaskTier {
    fmt_as_str!();
}

impl FromStr for TaskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "micro" => Ok(TaskTier::Micro),
            "small" => Ok(TaskTier::Small),
            "medium" => Ok(TaskTier::Medium),
            "large" => Ok(TaskTier::Large),
            other => Err(format!("unknown task tier: {other}")),
        }
    }
}

/// Billing plan, each defining caps per resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Team,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Team => "team",
            PlanTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fmt_as_str!();
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "team" => Ok(PlanTier::Team),
            "enterprise" => Ok(PlanTier::Enterprise),
            other => Err(format!("unknown plan tier: {other}")),
        }
    }
}

/// Kind of a `schemas` registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Model,
    Agent,
    Tool,
    Table,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Model => "model",
            SchemaKind::Agent => "agent",
            SchemaKind::Tool => "tool",
            SchemaKind::Table => "table",
        }
    }
}

impl fmt::Display for SchemaKind {
    fmt_as_str!();
}

impl FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(SchemaKind::Model),
            "agent" => Ok(SchemaKind::Agent),
            "tool" => Ok(SchemaKind::Tool),
            "table" => Ok(SchemaKind::Table),
            other => Err(format!("unknown schema kind: {other}")),
        }
    }
}

/// Configured KMS backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KmsProvider {
    #[default]
    Local,
    Vault,
    Aws,
}

impl FromStr for KmsProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(KmsProvider::Local),
            "vault" => Ok(KmsProvider::Vault),
            "aws" => Ok(KmsProvider::Aws),
            other => Err(format!("unknown KMS provider: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_level_round_trips() {
        for level in [
            EncryptionLevel::None,
            EncryptionLevel::Disabled,
            EncryptionLevel::Platform,
            EncryptionLevel::Client,
            EncryptionLevel::Sealed,
        ] {
            assert_eq!(level.as_str().parse::<EncryptionLevel>().unwrap(), level);
        }
    }

    #[test]
    fn only_platform_is_server_decryptable() {
        assert!(EncryptionLevel::Platform.server_decryptable());
        assert!(!EncryptionLevel::Client.server_decryptable());
        assert!(!EncryptionLevel::Sealed.server_decryptable());
    }

    #[test]
    fn file_tier_boundaries() {
        const MIB: u64 = 1024 * 1024;
        assert_eq!(TaskTier::for_file_size(0), TaskTier::Small);
        assert_eq!(TaskTier::for_file_size(MIB - 1), TaskTier::Small);
        assert_eq!(TaskTier::for_file_size(MIB), TaskTier::Medium);
        assert_eq!(TaskTier::for_file_size(50 * MIB - 1), TaskTier::Medium);
        assert_eq!(TaskTier::for_file_size(50 * MIB), TaskTier::Large);
    }

    #[test]
    fn tool_rows_are_skipped_in_replay() {
        assert!(MessageType::ToolCall.is_tool_row());
        assert!(MessageType::ToolResponse.is_tool_row());
        assert!(!MessageType::Assistant.is_tool_row());
    }
}
