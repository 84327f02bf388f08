use ffmpeg::format::Pixel;
use ffmpeg::frame;

use super::SampleBuf;

fn patterned_frame(width: u32, height: u32) -> frame::Video {
    let mut frame = frame::Video::new(Pixel::YUV420P, width, height);
    for plane in 0..3 {
        let (row_len, rows) = if plane == 0 {
            (width as usize, height as usize)
        } else {
            ((width / 2) as usize, (height / 2) as usize)
        };
        let stride = frame.stride(plane);
        let data = frame.data_mut(plane);
        for row in 0..rows {
            for col in 0..row_len {
                data[row * stride + col] = ((plane * 89 + row * 31 + col * 7) % 251) as u8;
            }
        }
    }
    frame
}

#[test]
fn push_and_fill_round_trip() {
    let frame = patterned_frame(32, 16);

    let mut buf = SampleBuf::new();
    buf.reset(32, 16);
    buf.push_frame(&frame);
    assert_eq!(buf.frames(), 1);

    let mut out = frame::Video::new(Pixel::YUV420P, 32, 16);
    buf.fill_frame(0, &mut out);

    for plane in 0..3 {
        let (row_len, rows) = if plane == 0 { (32, 16) } else { (16, 8) };
        let (src, src_stride) = (frame.data(plane), frame.stride(plane));
        let (dst, dst_stride) = (out.data(plane), out.stride(plane));
        for row in 0..rows {
            assert_eq!(
                &src[row * src_stride..row * src_stride + row_len],
                &dst[row * dst_stride..row * dst_stride + row_len],
            );
        }
    }
}

#[test]
fn planes_index_into_the_right_frame() {
    let mut buf = SampleBuf::new();
    buf.reset(8, 4);
    buf.push_planes(&[1; 32], &[2; 8], &[3; 8]);
    buf.push_planes(&[4; 32], &[5; 8], &[6; 8]);

    let (y, cb, cr) = buf.planes(1);
    assert!(y.iter().all(|&v| v == 4));
    assert!(cb.iter().all(|&v| v == 5));
    assert!(cr.iter().all(|&v| v == 6));
    assert_eq!(buf.luma(0), &[1; 32]);
}

#[test]
fn reset_keeps_capacity_and_drops_frames() {
    let mut buf = SampleBuf::new();
    buf.reset(8, 4);
    buf.push_planes(&[0; 32], &[0; 8], &[0; 8]);
    buf.reset(4, 4);
    assert!(buf.is_empty());
    assert_eq!(buf.frame_size(), 24);
}
