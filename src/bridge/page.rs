//! Page-side request handling

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::channel::{BridgeReply, BridgeRequest, CorrelationId};

use super::source::{CaptureSource, CaptureTarget, PublishOptions, PublishingTransport};
use super::{failure_reply, CaptureBridge};

impl<C: CaptureSource, T: PublishingTransport> CaptureBridge<C, T> {
    pub(super) async fn handle_page(
        &mut self,
        request: BridgeRequest,
        correlation_id: Option<CorrelationId>,
    ) -> Option<BridgeReply> {
        let reply = match request {
            BridgeRequest::Publish {
                session_key,
                target,
                stream_id,
                room_id,
                title,
                password,
                server,
            } => {
                let options = PublishOptions {
                    stream_id,
                    room_id,
                    password,
                    label: title,
                    ..Default::default()
                };
                return self.begin_publish(
                    correlation_id,
                    session_key,
                    CaptureTarget::element(target),
                    server,
                    options,
                );
            }

            BridgeRequest::Stop { stream_id } => {
                // Already gone is still a successful stop
                self.stop_publisher(&stream_id).await;
                BridgeReply::ok()
            }

            BridgeRequest::Thumbnail { stream_id } => self.thumbnail(&stream_id).await,

            BridgeRequest::StartTabCapture { .. } | BridgeRequest::StopTabCapture { .. } => {
                BridgeReply::failure("Tab capture is handled by the capture worker")
            }
        };
        Some(reply)
    }

    async fn thumbnail(&self, stream_id: &str) -> BridgeReply {
        let Some(publisher) = self.publishers.get(stream_id) else {
            return BridgeReply::failure(format!("No active stream {}", stream_id));
        };

        match self.source.snapshot(&publisher.target).await {
            Ok(jpeg) => BridgeReply::ok()
                .with_data_url(format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg))),
            Err(e) => failure_reply(e),
        }
    }
}
