//! Worker-side request handling
//!
//! The capture worker holds every tab capture. Tab streams come straight
//! from the capture source; there is no synthetic fallback for them.

use crate::channel::{BridgeReply, BridgeRequest, CorrelationId};

use super::source::{CaptureSource, CaptureTarget, PublishOptions, PublishingTransport};
use super::CaptureBridge;

impl<C: CaptureSource, T: PublishingTransport> CaptureBridge<C, T> {
    pub(super) async fn handle_worker(
        &mut self,
        request: BridgeRequest,
        correlation_id: Option<CorrelationId>,
    ) -> Option<BridgeReply> {
        let reply = match request {
            BridgeRequest::StartTabCapture {
                session_key,
                tab,
                audio,
                video,
                stream_id,
                room_id,
                server,
                quality,
                title,
            } => {
                if !audio && !video {
                    return Some(BridgeReply::failure(
                        "Nothing to capture: audio and video both disabled",
                    ));
                }

                let options = PublishOptions {
                    stream_id,
                    room_id,
                    password: quality.effective_password().map(str::to_string),
                    label: title,
                    bitrate: Some(quality.bitrate.unwrap_or(self.config.default_bitrate)),
                    codec: Some(
                        quality
                            .codec
                            .clone()
                            .unwrap_or_else(|| self.config.default_codec.clone()),
                    ),
                };
                return self.begin_publish(
                    correlation_id,
                    session_key,
                    CaptureTarget::Tab { tab, audio, video },
                    server,
                    options,
                );
            }

            BridgeRequest::StopTabCapture {
                stream_id: Some(stream_id),
            }
            | BridgeRequest::Stop { stream_id } => {
                self.stop_publisher(&stream_id).await;
                BridgeReply::ok()
            }

            BridgeRequest::StopTabCapture { stream_id: None } => {
                self.stop_all().await;
                BridgeReply::ok()
            }

            BridgeRequest::Publish { .. } | BridgeRequest::Thumbnail { .. } => {
                BridgeReply::failure("Not supported in the capture worker")
            }
        };
        Some(reply)
    }
}
