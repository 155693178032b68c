use upload_tracker::utils::sanitize_filename;

#[test]
fn test_sanitize_filename() {
    // plain names survive
    assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
    assert_eq!(sanitize_filename("IMG_2024-01.png"), "IMG_2024-01.png");

    // path components are flattened
    assert_eq!(sanitize_filename("../../etc/passwd"), "etcpasswd");
    assert_eq!(sanitize_filename("C:\\Users\\me\\report.pdf"), "CUsersmereport.pdf");

    // spaces and symbols dropped, hidden files unhidden
    assert_eq!(sanitize_filename("my file (1).txt"), "myfile1.txt");
    assert_eq!(sanitize_filename(".env"), "env");
    assert_eq!(sanitize_filename("..."), "");
}
