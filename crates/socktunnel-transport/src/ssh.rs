//! SSH session transport
//!
//! Channels are `direct-streamlocal@openssh.com` channels on an already
//! authenticated russh client session; the server connects each one to the
//! requested Unix socket on its side.

use crate::{Transport, TransportError, TransportResult};
use async_trait::async_trait;
use russh::client::{Handle, Handler, Msg};
use russh::ChannelStream;
use tracing::debug;

#[async_trait]
impl<H> Transport for Handle<H>
where
    H: Handler + Send + 'static,
{
    type Channel = ChannelStream<Msg>;

    async fn open_channel(&self, remote_path: &str) -> TransportResult<Self::Channel> {
        debug!(remote = %remote_path, "Opening direct-streamlocal channel");

        let channel = self
            .channel_open_direct_streamlocal(remote_path)
            .await
            .map_err(|e| TransportError::Rejected {
                endpoint: remote_path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(channel.into_stream())
    }

    fn name(&self) -> &str {
        "ssh"
    }
}
