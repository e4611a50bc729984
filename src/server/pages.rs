//! Static pages.

use axum::response::{Html, IntoResponse};

pub async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

pub async fn terms() -> impl IntoResponse {
    Html(page(
        "Terms of Service",
        r#"<p>By using this support chat you agree to use it for lawful purposes only.</p>
<p>Replies are generated automatically and may be inaccurate. Do not rely on them for legal, medical or financial decisions.</p>
<p>We may suspend accounts that abuse the service. These terms may change; continued use means you accept the current version.</p>"#,
    ))
}

pub async fn privacy() -> impl IntoResponse {
    Html(page(
        "Privacy Policy",
        r#"<p>We store your username, email address, a hash of your password and the conversations you have with the assistant.</p>
<p>Conversation text is sent to our inference service to produce replies. We do not sell your data.</p>
<p>Your session is kept in an HTTP-only cookie that expires after seven days. Contact support to have your account removed.</p>"#,
    ))
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"><title>{title}</title></head>
<body style="font-family: sans-serif; max-width: 720px; margin: 40px auto; line-height: 1.6;">
<h1>{title}</h1>
{body}
<p><a href="/">Back to chat</a></p>
</body>
</html>"#
    )
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Support Chat</title>
    <style>
        body { font-family: sans-serif; margin: 0; display: grid; grid-template-columns: 260px 1fr; height: 100vh; }
        nav { border-right: 1px solid #ddd; overflow-y: auto; padding: 10px; }
        nav a { display: block; padding: 6px; color: #222; text-decoration: none; border-radius: 4px; }
        nav a.active { background: #eef; }
        main { display: flex; flex-direction: column; }
        #messages { flex: 1; overflow-y: auto; padding: 20px; }
        .user { color: #555; margin: 10px 0; }
        .assistant { white-space: pre-wrap; margin: 10px 0 20px; }
        form.chat { display: flex; gap: 8px; padding: 10px; border-top: 1px solid #ddd; }
        form.chat input { flex: 1; }
        #auth { padding: 40px; }
    </style>
</head>
<body>
<nav>
    <button id="new-chat">New chat</button>
    <div id="chat-list"></div>
    <p><a href="/terms">Terms</a> <a href="/privacy">Privacy</a></p>
</nav>
<main>
    <div id="auth" hidden>
        <h2>Sign in</h2>
        <form id="login"><input name="email" placeholder="Email"> <input name="password" type="password" placeholder="Password"> <button>Login</button></form>
        <h2>Register</h2>
        <form id="register"><input name="username" placeholder="Username"> <input name="email" placeholder="Email"> <input name="password" type="password" placeholder="Password"> <button>Register</button></form>
        <p id="auth-error"></p>
    </div>
    <div id="messages"></div>
    <form class="chat" id="send"><input id="input" autocomplete="off" placeholder="Ask support..."><button id="send-btn">Send</button><button type="button" id="stop-btn" hidden>Stop</button></form>
</main>
<script>
let chatId = null;
let history = [];
let controller = null;

async function api(path, body) {
    const res = await fetch(path, body === undefined ? {} : { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify(body) });
    const json = await res.json().catch(() => ({ code: 1, message: res.statusText }));
    if (res.status === 401) { document.getElementById('auth').hidden = false; }
    return json;
}

function bubble(role, html) {
    const div = document.createElement('div');
    div.className = role;
    div.innerHTML = html;
    document.getElementById('messages').appendChild(div);
    return div;
}

function escapeText(text) {
    const div = document.createElement('div');
    div.textContent = text;
    return div.innerHTML;
}

async function loadChats() {
    const res = await api('/api/chat/list?page=1');
    if (res.code !== 0) return;
    const list = document.getElementById('chat-list');
    list.innerHTML = '';
    for (const chat of res.data.list) {
        const a = document.createElement('a');
        a.href = '#';
        a.textContent = chat.title;
        a.className = chat.id === chatId ? 'active' : '';
        a.onclick = (e) => { e.preventDefault(); openChat(chat.id); };
        list.appendChild(a);
    }
}

async function openChat(id) {
    chatId = id;
    history = [];
    document.getElementById('messages').innerHTML = '';
    const res = await api('/api/message/list?chatId=' + encodeURIComponent(id));
    if (res.code !== 0) return;
    for (const m of res.data.list) {
        history.push(m);
        bubble(m.role, m.role === 'assistant' ? m.content : escapeText(m.content));
    }
    loadChats();
}

async function send(content) {
    const saved = await api('/api/message/update', { role: 'user', content, chatId });
    if (saved.code !== 0) return;
    const isNew = !chatId;
    chatId = saved.data.message.chatId;
    history.push(saved.data.message);
    bubble('user', escapeText(content));

    const draft = await api('/api/message/update', { role: 'assistant', content: '', chatId });
    const target = bubble('assistant', '');
    let transcript = '';

    controller = new AbortController();
    document.getElementById('stop-btn').hidden = false;
    try {
        const res = await fetch('/api/chat', {
            method: 'POST',
            headers: { 'Content-Type': 'application/json' },
            body: JSON.stringify({ messages: history.map(m => ({ role: m.role, content: m.content, chatId })) }),
            signal: controller.signal,
        });
        if (!res.ok || !res.body) {
            const err = await res.json().catch(() => ({ message: res.statusText }));
            transcript = 'Error: ' + err.message;
        } else {
            const reader = res.body.getReader();
            const decoder = new TextDecoder();
            while (true) {
                const { value, done } = await reader.read();
                if (done) break;
                transcript += decoder.decode(value, { stream: true });
                target.innerHTML = transcript;
            }
            transcript += decoder.decode();
        }
    } catch (e) {
        if (e.name !== 'AbortError') transcript += '\nError: ' + e.message;
    }
    controller = null;
    document.getElementById('stop-btn').hidden = true;
    target.innerHTML = transcript;

    if (draft.code === 0) {
        const final = await api('/api/message/update', { id: draft.data.message.id, role: 'assistant', content: transcript, chatId });
        if (final.code === 0) history.push(final.data.message);
    }
    if (isNew) {
        await api('/api/chat/updatetitle', { chatId, messages: history.map(m => ({ role: m.role, content: m.content })) });
    }
    loadChats();
}

document.getElementById('send').onsubmit = (e) => {
    e.preventDefault();
    const input = document.getElementById('input');
    const content = input.value.trim();
    if (!content || controller) return;
    input.value = '';
    send(content);
};
document.getElementById('stop-btn').onclick = () => controller && controller.abort();
document.getElementById('new-chat').onclick = () => { chatId = null; history = []; document.getElementById('messages').innerHTML = ''; loadChats(); };

for (const id of ['login', 'register']) {
    document.getElementById(id).onsubmit = async (e) => {
        e.preventDefault();
        const body = Object.fromEntries(new FormData(e.target));
        const res = await api('/api/auth/' + id, body);
        if (res.code === 0 && id === 'register') {
            await api('/api/auth/login', { email: body.email, password: body.password });
        }
        if (res.code === 0) { location.reload(); } else { document.getElementById('auth-error').textContent = res.message; }
    };
}

api('/api/auth/me').then(res => {
    if (res.code !== 0) return;
    loadChats();
    const events = new EventSource('/api/events');
    events.addEventListener('chatList', loadChats);
});
</script>
</body>
</html>
"#;
