//! Check camera and capture capabilities.

use liveproof_capture::device::{available_cameras, gstreamer_available};

pub fn run() -> anyhow::Result<()> {
    println!("Liveproof System Check");
    println!("{}", "=".repeat(50));

    if gstreamer_available() {
        println!("[OK] GStreamer initialized");
    } else {
        println!("[ERR] GStreamer could not be initialized");
    }

    let cameras = available_cameras();
    if cameras.is_empty() {
        println!("[WARN] No /dev/video* devices found");
    } else {
        println!("[OK] Camera candidates: {}", cameras.len());
        for camera in &cameras {
            let note = if camera.priority == 0 {
                " (not a capture device)"
            } else {
                ""
            };
            println!("     {} priority {}{}", camera.path, camera.priority, note);
        }
    }

    println!();
    let ready = gstreamer_available() && cameras.iter().any(|c| c.priority > 0);
    if ready {
        println!("All required capabilities are available. Liveproof is ready.");
    } else {
        println!("Some required capabilities are missing. See above.");
    }

    Ok(())
}
