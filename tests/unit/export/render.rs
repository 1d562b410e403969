use super::*;
use std::path::Path;

const W: u32 = 8;
const H: u32 = 4;

fn project(page: &str) -> Project {
    Project::from_json(&format!(
        r#"{{"settings":{{"width":{W},"height":{H},"fps":10}},"pages":[{page}]}}"#
    ))
    .unwrap()
}

fn px(frame: &[u8], x: u32, y: u32) -> [u8; 4] {
    let i = ((y * W + x) * 4) as usize;
    [frame[i], frame[i + 1], frame[i + 2], frame[i + 3]]
}

fn render(p: &Project, dir: &Path, frame: u64) -> Vec<u8> {
    FrameRenderer::prepare(p, dir)
        .unwrap()
        .render(FrameIndex(frame))
        .unwrap()
}

#[test]
fn background_fills_the_frame() {
    let p = project(r##"{"duration":1,"background":"#102030"}"##);
    let frame = render(&p, Path::new("."), 0);
    assert_eq!(frame.len(), (W * H * 4) as usize);
    assert!(frame.chunks_exact(4).all(|c| c == [16, 32, 48, 255]));
}

#[test]
fn translucent_background_is_flattened_onto_black() {
    let p = project(r##"{"duration":1,"background":"#ff000080"}"##);
    let frame = render(&p, Path::new("."), 0);
    assert_eq!(px(&frame, 0, 0), [128, 0, 0, 255]);
}

#[test]
fn solid_layer_covers_its_rectangle() {
    let p = project(
        r##"{"duration":1,"layers":[
            {"type":"solid","color":"#ff0000","x":2,"y":1,"width":2,"height":2}
        ]}"##,
    );
    let frame = render(&p, Path::new("."), 0);
    assert_eq!(px(&frame, 2, 1), [255, 0, 0, 255]);
    assert_eq!(px(&frame, 3, 2), [255, 0, 0, 255]);
    assert_eq!(px(&frame, 1, 1), [0, 0, 0, 255]);
    assert_eq!(px(&frame, 4, 2), [0, 0, 0, 255]);
    assert_eq!(px(&frame, 2, 3), [0, 0, 0, 255]);
}

#[test]
fn layers_stack_bottom_first_and_blend_by_opacity() {
    let p = project(
        r##"{"duration":1,"layers":[
            {"type":"solid","color":"#0000ff","x":0,"y":0,"width":8,"height":4},
            {"type":"solid","color":"#ffffff","x":0,"y":0,"width":4,"height":4,"opacity":0.5}
        ]}"##,
    );
    let frame = render(&p, Path::new("."), 0);
    // 50% white over blue.
    assert_eq!(px(&frame, 0, 0), [128, 128, 255, 255]);
    assert_eq!(px(&frame, 6, 0), [0, 0, 255, 255]);
}

#[test]
fn layers_are_clipped_to_the_frame() {
    let p = project(
        r##"{"duration":1,"layers":[
            {"type":"solid","color":"#00ff00","x":-2,"y":-3,"width":4,"height":4},
            {"type":"solid","color":"#00ff00","x":7,"y":3,"width":10,"height":10}
        ]}"##,
    );
    let frame = render(&p, Path::new("."), 0);
    assert_eq!(px(&frame, 1, 0), [0, 255, 0, 255]);
    assert_eq!(px(&frame, 2, 0), [0, 0, 0, 255]);
    assert_eq!(px(&frame, 0, 1), [0, 0, 0, 255]);
    assert_eq!(px(&frame, 7, 3), [0, 255, 0, 255]);
}

#[test]
fn far_off_canvas_layers_render_nothing() {
    let p = project(
        r##"{"duration":1,"layers":[
            {"type":"solid","color":"#ff0000","x":1e19,"y":0,"width":2,"height":2},
            {"type":"solid","color":"#ff0000","x":0,"y":1e19,"width":2,"height":2},
            {"type":"solid","color":"#ff0000","x":-1e19,"y":-1e19,"width":2,"height":2},
            {"type":"solid","color":"#00ff00","x":6,"y":2,"width":2,"height":2}
        ]}"##,
    );
    let frame = render(&p, Path::new("."), 0);
    assert_eq!(px(&frame, 0, 0), [0, 0, 0, 255]);
    assert_eq!(px(&frame, 7, 3), [0, 255, 0, 255]);
    assert_eq!(
        frame.chunks_exact(4).filter(|c| c[0] == 255).count(),
        0
    );
}

#[test]
fn fades_and_windows_follow_the_page_clock() {
    let p = project(
        r##"{"duration":1,"layers":[
            {"type":"solid","color":"#ffffff","x":0,"y":0,"width":8,"height":4,"fadeIn":0.5},
            {"type":"solid","color":"#ff0000","x":0,"y":0,"width":1,"height":1,"start":0.5,"end":0.7}
        ]}"##,
    );
    let dir = Path::new(".");
    let renderer = FrameRenderer::prepare(&p, dir).unwrap();
    let first = renderer.render(FrameIndex(0)).unwrap();
    assert_eq!(px(&first, 4, 2), [0, 0, 0, 255]);
    let mid = renderer.render(FrameIndex(6)).unwrap();
    assert_eq!(px(&mid, 4, 2), [255, 255, 255, 255]);
    assert_eq!(px(&mid, 0, 0), [255, 0, 0, 255]);
    let late = renderer.render(FrameIndex(8)).unwrap();
    assert_eq!(px(&late, 0, 0), [255, 255, 255, 255]);
}

#[test]
fn image_layers_are_loaded_from_the_base_dir() {
    let dir = tempfile::tempdir().unwrap();
    let img = image::RgbaImage::from_raw(
        2,
        2,
        vec![
            255, 0, 0, 255, //
            0, 255, 0, 255, //
            0, 0, 255, 255, //
            255, 255, 255, 0,
        ],
    )
    .unwrap();
    img.save(dir.path().join("quad.png")).unwrap();

    let p = project(
        r##"{"duration":1,"background":"#202020","layers":[
            {"type":"image","source":"quad.png","x":1,"y":1,"width":2,"height":2}
        ]}"##,
    );
    let frame = render(&p, dir.path(), 0);
    assert_eq!(px(&frame, 1, 1), [255, 0, 0, 255]);
    assert_eq!(px(&frame, 2, 1), [0, 255, 0, 255]);
    assert_eq!(px(&frame, 1, 2), [0, 0, 255, 255]);
    // Fully transparent pixel shows the background.
    assert_eq!(px(&frame, 2, 2), [32, 32, 32, 255]);
}

#[test]
fn uniform_images_stay_uniform_when_resized() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbaImage::from_pixel(3, 3, image::Rgba([200, 100, 50, 255]))
        .save(dir.path().join("flat.png"))
        .unwrap();
    let p = project(
        r##"{"duration":1,"layers":[
            {"type":"image","source":"flat.png","x":0,"y":0,"width":8,"height":4}
        ]}"##,
    );
    let frame = render(&p, dir.path(), 0);
    for c in frame.chunks_exact(4) {
        assert!(c[0].abs_diff(200) <= 1 && c[1].abs_diff(100) <= 1 && c[2].abs_diff(50) <= 1);
        assert_eq!(c[3], 255);
    }
}

#[test]
fn missing_image_is_reported_with_its_source() {
    let dir = tempfile::tempdir().unwrap();
    let p = project(
        r##"{"duration":1,"layers":[
            {"type":"image","source":"nope.png","x":0,"y":0,"width":2,"height":2}
        ]}"##,
    );
    match FrameRenderer::prepare(&p, dir.path()) {
        Err(ExportError::Validation(msg)) => assert!(msg.contains("nope.png"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn over_matches_reference_values() {
    assert_eq!(over([1, 2, 3, 4], [200, 200, 200, 200], 0.0), [1, 2, 3, 4]);
    assert_eq!(over([0, 0, 0, 255], [255, 0, 0, 255], 1.0), [255, 0, 0, 255]);
    assert_eq!(over([0, 0, 0, 0], [100, 110, 120, 200], 1.0), [100, 110, 120, 200]);
}
