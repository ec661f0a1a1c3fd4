//! The caption submission page.
//!
//! Works with or without JavaScript: the script posts via `fetch` and asks for JSON,
//! while the plain form posts to the same endpoint and gets this page back with the
//! result filled in.

const RESULT_SLOT: &str = "<!--RESULT-->";

const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Image Captioner</title>
    <style>
        * {
            margin: 0;
            padding: 0;
            box-sizing: border-box;
        }

        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            padding: 20px;
        }

        .container {
            background: white;
            border-radius: 20px;
            box-shadow: 0 20px 60px rgba(0,0,0,0.3);
            max-width: 800px;
            width: 100%;
            padding: 40px;
        }

        h1 {
            color: #333;
            margin-bottom: 10px;
        }

        .subtitle {
            color: #666;
            margin-bottom: 30px;
            font-size: 0.9em;
        }

        form {
            display: flex;
            flex-direction: column;
            gap: 16px;
            border: 3px dashed #667eea;
            border-radius: 15px;
            padding: 30px 20px;
            background: #f8f9ff;
        }

        .options {
            display: flex;
            gap: 20px;
            color: #555;
        }

        button {
            align-self: flex-start;
            background: #667eea;
            color: white;
            border: none;
            border-radius: 20px;
            padding: 10px 24px;
            font-weight: 600;
            cursor: pointer;
        }

        button:disabled {
            background: #aab;
            cursor: wait;
        }

        .result {
            background: #f8f9ff;
            border-radius: 10px;
            padding: 20px;
            margin-top: 20px;
        }

        .result-label {
            color: #667eea;
            font-weight: 600;
            margin-bottom: 10px;
            font-size: 0.9em;
            text-transform: uppercase;
            letter-spacing: 1px;
        }

        .result ol {
            padding-left: 20px;
            color: #333;
            line-height: 1.6;
        }

        .error {
            background: #fee;
            border: 2px solid #fcc;
            color: #c33;
            padding: 15px;
            border-radius: 10px;
            margin-top: 20px;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Image Captioner</h1>
        <p class="subtitle">Upload a JPG, PNG, GIF, BMP, TIFF or WebP image to get ranked captions.</p>

        <form id="captionForm" action="/process_image" method="post" enctype="multipart/form-data">
            <input type="file" name="image" id="fileInput" accept="image/*" required>
            <div class="options">
                <label><input type="radio" name="variants" value="single"> One caption</label>
                <label><input type="radio" name="variants" value="multiple" checked> Several captions</label>
            </div>
            <button type="submit" id="submit">Generate captions</button>
        </form>

        <div id="result"><!--RESULT--></div>
    </div>

    <script>
        const form = document.getElementById('captionForm');
        const submit = document.getElementById('submit');
        const result = document.getElementById('result');

        function show(captions, error) {
            result.innerHTML = '';
            if (error) {
                const div = document.createElement('div');
                div.className = 'error';
                div.textContent = 'Error: ' + error;
                result.appendChild(div);
            }
            if (captions) {
                const box = document.createElement('div');
                box.className = 'result';
                const label = document.createElement('div');
                label.className = 'result-label';
                label.textContent = 'Captions';
                box.appendChild(label);
                const list = document.createElement('ol');
                for (const caption of captions) {
                    const item = document.createElement('li');
                    item.textContent = caption;
                    list.appendChild(item);
                }
                if (captions.length === 0) {
                    const item = document.createElement('li');
                    item.textContent = '(no captions)';
                    list.appendChild(item);
                }
                box.appendChild(list);
                result.appendChild(box);
            }
        }

        form.addEventListener('submit', async (e) => {
            e.preventDefault();
            submit.disabled = true;
            try {
                const response = await fetch('/process_image', {
                    method: 'POST',
                    headers: { 'Accept': 'application/json' },
                    body: new FormData(form)
                });
                const body = await response.json();
                show(response.ok ? body.captions : null, body.error);
            } catch (error) {
                show(null, error.message);
            } finally {
                submit.disabled = false;
            }
        });
    </script>
</body>
</html>
"#;

/// The empty page served at `/`.
pub fn index() -> &'static str {
    PAGE
}

/// The page with a server-rendered result block.
pub fn render(captions: Option<&[String]>, error: Option<&str>) -> String {
    let mut block = String::new();

    if let Some(error) = error {
        block.push_str(r#"<div class="error">Error: "#);
        block.push_str(&escape_html(error));
        block.push_str("</div>");
    }

    if let Some(captions) = captions {
        block.push_str(r#"<div class="result"><div class="result-label">Captions</div><ol>"#);
        for caption in captions {
            block.push_str("<li>");
            block.push_str(&escape_html(caption));
            block.push_str("</li>");
        }
        if captions.is_empty() {
            block.push_str("<li>(no captions)</li>");
        }
        block.push_str("</ol></div>");
    }

    PAGE.replacen(RESULT_SLOT, &block, 1)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
