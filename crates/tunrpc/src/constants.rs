//! Well-known media types, headers and sub-paths.

use crate::content_type::ContentType;

/// Body of an invocation request.
pub const INVOCATION: ContentType = ContentType::from_static("application/x-wf-ejb-jbmar-invocation", 1);
/// Body of a successful invocation response.
pub const INVOCATION_RESPONSE: ContentType = ContentType::from_static("application/x-wf-ejb-jbmar-response", 1);
/// Body of any failure response.
pub const EXCEPTION: ContentType = ContentType::from_static("application/x-wf-jbmar-exception", 1);
/// Body of a transaction primitive request.
pub const XID: ContentType = ContentType::from_static("application/x-wf-jbmar-xid", 1);

/// Client-generated id that a later cancellation request refers to.
pub const INVOCATION_ID_HEADER: &str = "x-wf-invocation-id";
/// Set to `true` on a prepare response when the branch voted read-only.
pub const READ_ONLY_HEADER: &str = "x-wf-txn-read-only";
/// Session affinity cookie.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// Mount point of the invocation handler under the service root.
pub const INVOKE_PATH: &str = "/ejb/v1/invoke";
/// Mount point of the cancellation handler under the service root.
pub const CANCEL_PATH: &str = "/ejb/v1/cancel";

/// Root of the transaction sub-paths under the service root.
pub const TXN_CONTEXT: &str = "/txn/v1";
pub const XA_PREPARE_PATH: &str = "/xa/prep";
pub const XA_COMMIT_PATH: &str = "/xa/commit";
pub const XA_ROLLBACK_PATH: &str = "/xa/rollback";
pub const XA_BEFORE_COMPLETION_PATH: &str = "/xa/bc";
pub const XA_FORGET_PATH: &str = "/xa/forget";
/// Query flag on the commit path requesting a single-round commit.
pub const ONE_PHASE_QUERY: &str = "opc=true";
