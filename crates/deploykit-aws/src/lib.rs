//! deploykit-aws: AWS backend for deploykit
//!
//! Implements the session, object store and inference platform traits of
//! `deploykit-core` by driving the `aws` command line tool, so credentials,
//! profiles and SSO resolve exactly as they do for the operator's shell.

pub mod cli;
pub mod s3;
pub mod sagemaker;
pub mod session;

pub use cli::{is_aws_cli_available, AwsCli};
pub use s3::S3Store;
pub use sagemaker::{EndpointDescription, EndpointStatus, SageMakerPlatform};
pub use session::AwsSession;
