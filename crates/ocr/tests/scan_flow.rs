use std::io::Cursor;

use docscan_core::{LabelMode, ScanConfig};
use docscan_ocr::{
    Extractor, MockRecognizer, PreprocessOptions, ScanJob, ScanPipeline, ScanPool,
};
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};

const FORM_TEXT: &str = "\
STUDENT REPORT
Name: Siti Rahma
Class : 5B

No Subject Score
1 Math 90
2 Physics 85
remarks pending
3 Biology 88 (retake)
";

fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img: RgbaImage = ImageBuffer::from_fn(width, height, |x, y| {
        let v = ((x + y) * 255 / (width + height)) as u8;
        Rgba([v, v / 2, 255 - v, 200])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[tokio::test]
async fn configured_scan_yields_fields_and_table() {
    let cfg = ScanConfig::from_toml_str(
        r#"
        [preprocess]
        threshold = 100
        compress = true

        [extract]
        fields = ["Name", "Class", "Homeroom"]
        columns = ["No", "Subject", "Score"]
        "#,
    )
    .unwrap();

    let options = PreprocessOptions::from(&cfg.preprocess);
    let mut pipeline = ScanPipeline::acquire(&MockRecognizer::new(FORM_TEXT), &cfg.ocr.lang, options)
        .with_extractor(Extractor::with_label_mode(cfg.extract.label_mode));

    let result = pipeline.process(ScanJob::new("report.png", sample_png(900, 300))).await.unwrap();
    assert!(result.is_recognized());

    let report = pipeline.report(&result.key, &cfg.extract.fields, &cfg.extract.columns).unwrap();
    assert_eq!(report.fields.get("Name"), Some("Siti Rahma"));
    assert_eq!(report.fields.get("Class"), Some("5B"));
    assert_eq!(report.fields.get("Homeroom"), Some(""));

    let subjects: Vec<_> = report.table.iter().filter_map(|r| r.get("Subject")).collect();
    assert_eq!(subjects, vec!["Math", "Physics", "Biology"]);
    assert_eq!(report.table[2].get("Score"), Some("88"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["name"], "report.png");
    assert_eq!(json["fields"]["Name"], "Siti Rahma");
    assert_eq!(json["table"][0]["No"], "1");

    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn pattern_labels_from_config() {
    let cfg = ScanConfig::from_toml_str("[extract]\nlabel_mode = \"pattern\"\n").unwrap();
    assert_eq!(cfg.extract.label_mode, LabelMode::Pattern);

    let mut pipeline = ScanPipeline::acquire(
        &MockRecognizer::new("Tel. 555-0101"),
        "eng",
        PreprocessOptions::default(),
    )
    .with_extractor(Extractor::with_label_mode(cfg.extract.label_mode));
    let result = pipeline.process(ScanJob::new("card.png", b"card".to_vec())).await.unwrap();

    let report = pipeline.report::<_, &str>(&result.key, &["(Tel|Phone)\\."], &[]).unwrap();
    assert_eq!(report.fields.get("(Tel|Phone)\\."), Some("555-0101"));
}

#[tokio::test]
async fn pooled_batch_mixes_good_and_bad_files() {
    let options = PreprocessOptions { threshold: Some(128.0), compress: None };
    let pool = ScanPool::acquire(&MockRecognizer::new("ok"), "ind+eng", 2, &options);

    let jobs = vec![
        ScanJob::new("a.png", sample_png(20, 10)),
        ScanJob::new("broken.png", b"not an image".to_vec()),
        ScanJob::new("c.png", sample_png(30, 12)),
    ];
    let outcome = pool.run(jobs).await.unwrap();

    let texts: Vec<_> = outcome.results.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["ok", "Error processing image", "ok"]);

    for pipeline in outcome.pipelines {
        pipeline.shutdown().unwrap();
    }
}
