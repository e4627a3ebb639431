use assay_vision::config::{MonitorConfig, StreamConfig};
use assay_vision::core_modules::frame::Frame;
use assay_vision::frame_stream::{
    self, FrameSource, PauseOnEndOfStream, SourceFrame, StreamRunner,
};
use assay_vision::pipeline::MonitorPipeline;
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::Duration;

/// Yields `remaining` flat frames, with a not-ready gap before each one.
struct Scripted {
    remaining: u32,
    ready: bool,
}

impl FrameSource for Scripted {
    fn grab(&mut self) -> assay_vision::Result<SourceFrame> {
        if self.remaining == 0 {
            return Ok(SourceFrame::EndOfStream);
        }
        self.ready = !self.ready;
        if !self.ready {
            return Ok(SourceFrame::NotReady);
        }
        self.remaining -= 1;
        let level = 40 + self.remaining as u8;
        Ok(SourceFrame::Frame(Frame::from_image(RgbImage::from_pixel(
            32,
            24,
            Rgb([level, level, level]),
        ))))
    }
}

#[tokio::test]
async fn end_of_stream_pauses_the_pipeline_and_stop_joins_both_loops() {
    let pipeline = frame_stream::share(MonitorPipeline::new(&MonitorConfig::default()));
    let observer = Arc::new(PauseOnEndOfStream::new(Arc::clone(&pipeline)));
    let config = StreamConfig {
        capture_interval_ms: 2,
        analysis_interval_ms: 5,
    };
    let runner = StreamRunner::spawn(
        Scripted { remaining: 10, ready: false },
        Arc::clone(&pipeline),
        observer,
        &config,
    );

    let mut waited = Duration::ZERO;
    while !frame_stream::lock_pipeline(&pipeline).is_paused() {
        assert!(waited < Duration::from_secs(5), "stream never reached its end");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }

    runner.stop();
    runner.join().await.unwrap();

    let guard = frame_stream::lock_pipeline(&pipeline);
    // Frames can be skipped but never analysed twice.
    assert!(guard.sample_count() <= 10);
    assert!(guard.is_paused());
}

#[tokio::test]
async fn stopping_without_frames_still_terminates() {
    struct Idle;
    impl FrameSource for Idle {
        fn grab(&mut self) -> assay_vision::Result<SourceFrame> {
            Ok(SourceFrame::NotReady)
        }
    }

    let pipeline = frame_stream::share(MonitorPipeline::new(&MonitorConfig::default()));
    let observer = Arc::new(PauseOnEndOfStream::new(Arc::clone(&pipeline)));
    let runner = StreamRunner::spawn(Idle, Arc::clone(&pipeline), observer, &StreamConfig::default());
    assert!(runner.latest_frame().latest().is_none());
    runner.stop();
    runner.join().await.unwrap();
    assert_eq!(frame_stream::lock_pipeline(&pipeline).sample_count(), 0);
}
